mod cdp;
mod profile;
mod stealth;
mod store;

pub use cdp::CdpDriver;
pub use profile::{ProfileManager, SessionProfile};
pub use stealth::StealthMasker;
pub use store::{FileSessionStore, SessionCookie, SessionState};

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::future::LocalBoxFuture;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ViewportSection};
use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Launches isolated, stealth-configured browser contexts. Each launch gets
/// a throwaway profile, a viewport sampled from a realistic pool and a user
/// agent from the configured set.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: Arc<EngineConfig>,
    profiles: ProfileManager,
    stealth: StealthMasker,
}

impl SessionLauncher {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let ttl = Duration::from_secs(config.session.profile_ttl_hours * 3600);
        let profiles = ProfileManager::new(&config.session.profile_dir, ttl)?;
        let stealth = StealthMasker::new(config.fingerprint.clone(), config.flags.clone());
        Ok(Self {
            config: Arc::new(config),
            profiles,
            stealth,
        })
    }

    pub fn profile_manager(&self) -> &ProfileManager {
        &self.profiles
    }

    /// Launch a session, restoring `state` if given. Prefer
    /// [`SessionLauncher::with_session`], which also guarantees shutdown.
    pub async fn launch(&self, state: Option<SessionState>) -> EngineResult<BrowserSession> {
        self.profiles.cleanup_expired()?;
        let profile = self.profiles.allocate()?;
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&profile, &viewport, &user_agent)?;
        info!(
            profile = %profile.id(),
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            "launching stealth browser session"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| EngineError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        self.configure_page(&page, &user_agent).await?;

        let state = state.unwrap_or_default();
        if !state.cookies.is_empty() {
            restore_cookies(&page, &state.cookies).await?;
        }

        Ok(BrowserSession {
            browser,
            page,
            handler_task: Some(handler_task),
            profile,
            viewport,
            user_agent,
            state,
            history_bound: self.config.limits.history_entries,
        })
    }

    /// Scoped acquisition: run `op` against a fresh session, snapshot and
    /// persist the session state, and shut the browser down on every exit
    /// path, including an erroring `op`.
    pub async fn with_session<T, F>(
        &self,
        store: Option<&FileSessionStore>,
        op: F,
    ) -> EngineResult<T>
    where
        F: for<'s> FnOnce(&'s mut BrowserSession) -> LocalBoxFuture<'s, EngineResult<T>>,
    {
        let initial = match store {
            Some(store) => store.load()?,
            None => None,
        };
        let mut session = self.launch(initial).await?;
        let result = op(&mut session).await;
        let snapshot = session.snapshot_state().await;
        if let Some(store) = store {
            if let Err(err) = store.save(&snapshot) {
                warn!(error = %err, "failed to persist session state");
            }
        }
        if let Err(err) = session.shutdown().await {
            warn!(error = %err, "browser shutdown reported an error");
        }
        result
    }

    fn select_viewport(&self) -> ViewportSpec {
        let ViewportSection {
            resolutions,
            jitter_pixels,
            device_scale_factor,
        } = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let base = resolutions.choose(&mut rng).cloned().unwrap_or([1366, 768]);
        let jitter = *jitter_pixels as i32;
        let width = (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(640, 2560) as u32;
        let height = (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(480, 1600) as u32;
        let scale = rng.gen_range(device_scale_factor[0]..=device_scale_factor[1]) as f64;
        ViewportSpec {
            width,
            height,
            device_scale_factor: scale,
        }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .pool
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string()
            })
    }

    fn build_chromium_config(
        &self,
        profile: &SessionProfile,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> EngineResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let flags = &self.config.flags;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            });

        if let Some(executable) = &chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(Duration::from_secs(chromium.nav_timeout_seconds));

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if let Some(lang) = &flags.lang {
            args.push(format!("--lang={lang}"));
        }
        for feature in &flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(accept) = &flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--password-store=basic".into());
        builder = builder.args(args);

        builder.build().map_err(EngineError::Launch)
    }

    async fn configure_page(&self, page: &Page, user_agent: &str) -> EngineResult<()> {
        page.enable_stealth_mode_with_agent(user_agent).await?;
        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(user_agent.to_string());
        if let Some(accept) = &self.config.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder.build().map_err(EngineError::Launch)?;
        page.set_user_agent(params).await?;
        self.stealth.apply(page).await?;
        Ok(())
    }
}

async fn restore_cookies(page: &Page, cookies: &[SessionCookie]) -> EngineResult<()> {
    let mut params = Vec::with_capacity(cookies.len());
    for cookie in cookies {
        let param = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.clone())
            .domain(cookie.domain.clone())
            .path(cookie.path.clone())
            .secure(cookie.secure)
            .http_only(cookie.http_only)
            .build()
            .map_err(EngineError::Session)?;
        params.push(param);
    }
    page.set_cookies(params).await?;
    Ok(())
}

/// One isolated browser context for one or more sequential submissions.
/// Owns the Chromium process, its event-handler task and the session state
/// that will be written back at scope exit.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    profile: SessionProfile,
    viewport: ViewportSpec,
    user_agent: String,
    state: SessionState,
    history_bound: usize,
}

impl BrowserSession {
    /// Fresh driver over this session's page. Drivers are cheap; the
    /// navigation epoch lives in the driver, so use one driver per
    /// submission.
    pub fn driver(&self) -> CdpDriver {
        CdpDriver::new(self.page.clone())
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Fold the live cookie jar and location into the session state.
    /// Failures degrade to the last known snapshot rather than erroring.
    pub async fn snapshot_state(&mut self) -> SessionState {
        match self.page.get_cookies().await {
            Ok(cookies) => {
                self.state.cookies = cookies.into_iter().map(session_cookie).collect();
            }
            Err(err) => warn!(error = %err, "failed to snapshot cookies"),
        }
        match self.page.url().await {
            Ok(Some(url)) => {
                self.state.last_url = Some(url.clone());
                let bound = self.history_bound;
                self.state.push_history(url, bound);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read page url"),
        }
        self.state.clone()
    }

    pub async fn shutdown(mut self) -> EngineResult<()> {
        info!(profile = %self.profile.id(), "shutting down browser session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!(
                    profile = %self.profile.id(),
                    "browser session dropped without explicit shutdown"
                );
            }
        }
    }
}

fn session_cookie(cookie: Cookie) -> SessionCookie {
    SessionCookie {
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        secure: cookie.secure,
        http_only: cookie.http_only,
    }
}
