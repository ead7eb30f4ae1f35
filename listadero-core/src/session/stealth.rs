use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;

use crate::config::{FingerprintSection, FlagsSection};
use crate::engine::{EngineError, EngineResult};

/// Injects the anti-detection surface once per page: webdriver and language
/// overrides plus canvas/WebGL/audio fingerprint noise. All scripts run on
/// every new document, before site code.
#[derive(Debug, Clone)]
pub struct StealthMasker {
    fingerprint: FingerprintSection,
    flags: FlagsSection,
}

impl StealthMasker {
    pub fn new(fingerprint: FingerprintSection, flags: FlagsSection) -> Self {
        Self { fingerprint, flags }
    }

    pub async fn apply(&self, page: &Page) -> EngineResult<()> {
        self.hide_webdriver(page).await?;
        if let Some(lang) = &self.flags.lang {
            self.override_languages(page, lang).await?;
        }
        if self.fingerprint.enable_canvas_noise {
            self.inject_canvas_noise(page).await?;
        }
        if self.fingerprint.enable_webgl_mask {
            self.mask_webgl(page).await?;
        }
        if self.fingerprint.enable_audio_mask {
            self.mask_audio_context(page).await?;
        }
        Ok(())
    }

    async fn install(&self, page: &Page, source: String) -> EngineResult<()> {
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(source)
                .build()
                .map_err(EngineError::Launch)?,
        )
        .await?;
        Ok(())
    }

    async fn hide_webdriver(&self, page: &Page) -> EngineResult<()> {
        let script = r#"
            (() => {
                Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
                if (window.chrome === undefined) {
                    window.chrome = { runtime: {} };
                }
                const originalQuery = window.navigator.permissions?.query;
                if (originalQuery) {
                    window.navigator.permissions.query = (parameters) =>
                        parameters.name === 'notifications'
                            ? Promise.resolve({ state: Notification.permission })
                            : originalQuery(parameters);
                }
            })();
        "#;
        self.install(page, script.to_string()).await
    }

    async fn override_languages(&self, page: &Page, lang: &str) -> EngineResult<()> {
        let script = format!(
            "Object.defineProperty(navigator, 'language', {{ get: () => '{lang}' }});\nObject.defineProperty(navigator, 'languages', {{ get: () => ['{lang}', 'es', 'en-US'] }});"
        );
        self.install(page, script).await
    }

    async fn inject_canvas_noise(&self, page: &Page) -> EngineResult<()> {
        let min = self.fingerprint.canvas_noise_range[0];
        let max = self.fingerprint.canvas_noise_range[1];
        let script = format!(
            r#"
            (() => {{
                const randomInt = (min, max) => {{
                    return Math.floor(Math.random() * (max - min + 1)) + min;
                }};
                const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
                HTMLCanvasElement.prototype.toDataURL = function() {{
                    try {{
                        const ctx = this.getContext('2d');
                        if (ctx) {{
                            const imageData = ctx.getImageData(0, 0, this.width, this.height);
                            for (let i = 0; i < imageData.data.length; i += 4) {{
                                const delta = randomInt({min}, {max});
                                imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                            }}
                            ctx.putImageData(imageData, 0, 0);
                        }}
                    }} catch (_) {{}}
                    return originalToDataURL.apply(this, arguments);
                }};
            }})();
            "#
        );
        self.install(page, script).await
    }

    async fn mask_webgl(&self, page: &Page) -> EngineResult<()> {
        let vendor = self
            .fingerprint
            .webgl_vendor
            .clone()
            .unwrap_or_else(|| "Intel Inc.".to_string());
        let renderer = self
            .fingerprint
            .webgl_renderer
            .clone()
            .unwrap_or_else(|| "Intel Iris OpenGL Engine".to_string());
        let script = format!(
            r#"
            (() => {{
                const spoofParam = (proto) => {{
                    if (!proto || !proto.getParameter) {{
                        return;
                    }}
                    const original = proto.getParameter;
                    proto.getParameter = function(param) {{
                        if (param === 37445) {{
                            return '{vendor}';
                        }}
                        if (param === 37446) {{
                            return '{renderer}';
                        }}
                        return original.apply(this, arguments);
                    }};
                }};
                spoofParam(WebGLRenderingContext?.prototype);
                spoofParam(WebGL2RenderingContext?.prototype);
            }})();
            "#
        );
        self.install(page, script).await
    }

    async fn mask_audio_context(&self, page: &Page) -> EngineResult<()> {
        let noise = self.fingerprint.audio_noise;
        let script = format!(
            r#"
            (() => {{
                const noiseLevel = {noise};
                const origGetChannelData = AudioBuffer?.prototype?.getChannelData;
                if (!origGetChannelData) {{
                    return;
                }}
                AudioBuffer.prototype.getChannelData = function(channel) {{
                    const data = origGetChannelData.call(this, channel);
                    if (data) {{
                        for (let i = 0; i < data.length; i++) {{
                            data[i] = data[i] + (Math.random() * noiseLevel - noiseLevel / 2);
                        }}
                    }}
                    return data;
                }};
            }})();
            "#
        );
        self.install(page, script).await
    }
}
