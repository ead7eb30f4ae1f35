use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub viewport: ViewportSection,
    pub user_agents: UserAgentSection,
    pub fingerprint: FingerprintSection,
    pub behavior: BehaviorSection,
    pub locator: LocatorSection,
    pub recovery: RecoverySection,
    pub limits: LimitsSection,
    pub marketplace: MarketplaceSection,
    pub session: SessionSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub nav_timeout_seconds: u64,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: true,
            nav_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            no_first_run: true,
            disable_automation_controlled: true,
            disable_blink_features: vec!["AutomationControlled".to_string()],
            mute_audio: true,
            lang: Some("es-MX".to_string()),
            accept_language: Some("es-MX,es;q=0.9,en;q=0.6".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

impl Default for ViewportSection {
    fn default() -> Self {
        Self {
            resolutions: vec![[1366, 768], [1440, 900], [1536, 864], [1920, 1080]],
            jitter_pixels: 16,
            device_scale_factor: [1.0, 1.25],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

impl Default for UserAgentSection {
    fn default() -> Self {
        Self {
            pool: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    pub enable_canvas_noise: bool,
    pub enable_webgl_mask: bool,
    pub enable_audio_mask: bool,
    pub canvas_noise_range: [i32; 2],
    pub audio_noise: f64,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            enable_canvas_noise: true,
            enable_webgl_mask: true,
            enable_audio_mask: true,
            canvas_noise_range: [-2, 2],
            audio_noise: 0.0001,
            webgl_vendor: None,
            webgl_renderer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorProfile {
    Cautious,
    Normal,
    Fast,
}

impl BehaviorProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorProfile::Cautious => "cautious",
            BehaviorProfile::Normal => "normal",
            BehaviorProfile::Fast => "fast",
        }
    }

    /// Pointer speed and typing cadence multiplier.
    pub fn speed_factor(&self) -> f64 {
        match self {
            BehaviorProfile::Cautious => 0.75,
            BehaviorProfile::Normal => 1.0,
            BehaviorProfile::Fast => 1.35,
        }
    }

    /// Widens or narrows the sampled delay distributions.
    pub fn spread_factor(&self) -> f64 {
        match self {
            BehaviorProfile::Cautious => 1.3,
            BehaviorProfile::Normal => 1.0,
            BehaviorProfile::Fast => 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    pub profile: BehaviorProfile,
    pub pointer_speed_px_s: [u32; 2],
    pub max_deviation_ratio: f64,
    pub max_deviation_px: f64,
    pub click_hesitation_ms: [u32; 2],
    pub typing_cadence_cpm: [u32; 2],
    pub typing_sigma: f64,
    pub typo_probability: f64,
    pub typo_pause_ms: [u32; 2],
    pub idle_duration_ms: [u32; 2],
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            profile: BehaviorProfile::Normal,
            pointer_speed_px_s: [600, 1400],
            max_deviation_ratio: 0.12,
            max_deviation_px: 120.0,
            click_hesitation_ms: [80, 350],
            typing_cadence_cpm: [180, 420],
            typing_sigma: 0.35,
            typo_probability: 0.03,
            typo_pause_ms: [120, 420],
            idle_duration_ms: [400, 1800],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocatorSection {
    pub probe_timeout_ms: u64,
    pub probe_budget_ms: u64,
}

impl Default for LocatorSection {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1500,
            probe_budget_ms: 12_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub transient_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_ms: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            transient_retries: 3,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_cap_ms: 8_000,
            backoff_jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_images_property: usize,
    pub max_images_item: usize,
    pub submission_deadline_seconds: u64,
    pub history_entries: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_images_property: 50,
            max_images_item: 10,
            submission_deadline_seconds: 480,
            history_entries: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceSection {
    pub item_form_url: String,
    pub property_form_url: String,
    pub anchor_url: String,
    pub login_markers: Vec<String>,
    pub rate_limit_markers: Vec<String>,
}

impl Default for MarketplaceSection {
    fn default() -> Self {
        Self {
            item_form_url: "https://www.facebook.com/marketplace/create/item".to_string(),
            property_form_url: "https://www.facebook.com/marketplace/create/rental".to_string(),
            anchor_url: "https://www.facebook.com/marketplace/".to_string(),
            login_markers: vec!["/login".to_string(), "/checkpoint".to_string()],
            rate_limit_markers: vec!["/blocked".to_string(), "temporarily_blocked".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub profile_dir: String,
    pub profile_ttl_hours: u64,
    pub state_file: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            profile_dir: "data/profiles".to_string(),
            profile_ttl_hours: 24,
            state_file: "data/session.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub attempt_log: String,
    pub metrics_db: String,
    pub screenshot_dir: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            attempt_log: "logs/attempts.log".to_string(),
            metrics_db: "data/metrics.sqlite".to_string(),
            screenshot_dir: "data/screenshots".to_string(),
        }
    }
}

pub fn load_engine_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_policy_values() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.max_images_property, 50);
        assert_eq!(config.limits.max_images_item, 10);
        assert_eq!(config.recovery.transient_retries, 3);
        assert!(config.behavior.max_deviation_ratio > 0.0);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let raw = r#"
            [behavior]
            profile = "cautious"
            typo_probability = 0.0

            [limits]
            max_images_item = 4
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.behavior.profile, BehaviorProfile::Cautious);
        assert_eq!(config.behavior.typo_probability, 0.0);
        assert_eq!(config.limits.max_images_item, 4);
        // untouched sections keep their defaults
        assert_eq!(config.limits.max_images_property, 50);
        assert_eq!(config.locator.probe_timeout_ms, 1500);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = load_engine_config("/nonexistent/listadero.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
