use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};

use crate::engine::{
    normalize_label, ElementHandle, EngineError, EngineResult, KeyInput, PageDriver, PagePoint,
    PageRect,
};
use crate::listing::ResolutionStrategy;

/// [`PageDriver`] over a live Chromium page. Non-CSS strategies resolve by
/// tagging the matched node with a `data-ldr-probe` attribute, which gives
/// every handle a plain selector to re-find the element by; a handle whose
/// selector no longer matches is reported stale, never silently swapped.
#[derive(Debug)]
pub struct CdpDriver {
    page: Page,
    epoch: u64,
    probe_seq: u64,
}

impl CdpDriver {
    pub(crate) fn new(page: Page) -> Self {
        Self {
            page,
            epoch: 0,
            probe_seq: 0,
        }
    }

    fn next_probe_tag(&mut self) -> String {
        self.probe_seq += 1;
        format!("ldr-{}-{}", self.epoch, self.probe_seq)
    }

    async fn element(&self, handle: &ElementHandle) -> EngineResult<Element> {
        if handle.epoch != self.epoch {
            return Err(EngineError::Stale(format!(
                "{} resolved before navigation",
                handle.selector
            )));
        }
        self.page
            .find_element(handle.selector.clone())
            .await
            .map_err(|_| EngineError::Stale(handle.selector.clone()))
    }

    async fn eval_bool(&self, script: String) -> EngineResult<bool> {
        let value = self
            .page
            .evaluate(script)
            .await?
            .into_value::<bool>()
            .map_err(|err| EngineError::Fatal(format!("probe script returned non-bool: {err}")))?;
        Ok(value)
    }

    async fn tag_match(&mut self, script: String, tag: &str) -> EngineResult<Option<ElementHandle>> {
        if self.eval_bool(script).await? {
            Ok(Some(ElementHandle {
                selector: format!("[data-ldr-probe='{tag}']"),
                epoch: self.epoch,
            }))
        } else {
            Ok(None)
        }
    }

    fn js_string(value: &str) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
    }
}

#[async_trait(?Send)]
impl PageDriver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(EngineError::Fatal)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        self.epoch += 1;
        Ok(())
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    async fn current_url(&mut self) -> EngineResult<String> {
        self.page
            .url()
            .await?
            .ok_or_else(|| EngineError::Fatal("page reports no url".to_string()))
    }

    async fn query(
        &mut self,
        strategy: &ResolutionStrategy,
    ) -> EngineResult<Option<ElementHandle>> {
        match strategy {
            ResolutionStrategy::Css(selector) => {
                match self.page.find_element(selector.clone()).await {
                    Ok(_) => Ok(Some(ElementHandle {
                        selector: selector.clone(),
                        epoch: self.epoch,
                    })),
                    Err(_) => Ok(None),
                }
            }
            ResolutionStrategy::LabelText(text) => {
                let tag = self.next_probe_tag();
                let wanted = Self::js_string(&normalize_label(text));
                let script = format!(
                    r#"
                    (() => {{
                        const norm = (s) => (s || '').trim().replace(/\s+/g, ' ').toLowerCase();
                        const wanted = norm({wanted});
                        const labels = Array.from(document.querySelectorAll('label, span, div'));
                        for (const label of labels) {{
                            if (norm(label.textContent) !== wanted) continue;
                            let control = null;
                            const forId = label.getAttribute && label.getAttribute('for');
                            if (forId) control = document.getElementById(forId);
                            if (!control) control = label.querySelector('input, textarea, select');
                            if (!control && label.parentElement) {{
                                control = label.parentElement.querySelector('input, textarea, select');
                            }}
                            if (control) {{
                                control.setAttribute('data-ldr-probe', '{tag}');
                                return true;
                            }}
                        }}
                        return false;
                    }})()
                    "#
                );
                self.tag_match(script, &tag).await
            }
            ResolutionStrategy::Role { role, name } => {
                let tag = self.next_probe_tag();
                let wanted = Self::js_string(&normalize_label(name));
                let implicit = match role.as_str() {
                    "textbox" => "input:not([type='file']), textarea",
                    "combobox" => "select",
                    "button" => "button, input[type='submit']",
                    _ => "",
                };
                let role_json = Self::js_string(role);
                let implicit_json = Self::js_string(implicit);
                let script = format!(
                    r#"
                    (() => {{
                        const norm = (s) => (s || '').trim().replace(/\s+/g, ' ').toLowerCase();
                        const wanted = norm({wanted});
                        const explicit = Array.from(document.querySelectorAll('[role=' + JSON.stringify({role_json}) + ']'));
                        const implicitSel = {implicit_json};
                        const implicit = implicitSel ? Array.from(document.querySelectorAll(implicitSel)) : [];
                        for (const el of explicit.concat(implicit)) {{
                            const name = el.getAttribute('aria-label')
                                || el.getAttribute('placeholder')
                                || el.textContent;
                            if (norm(name) !== wanted) continue;
                            el.setAttribute('data-ldr-probe', '{tag}');
                            return true;
                        }}
                        return false;
                    }})()
                    "#
                );
                self.tag_match(script, &tag).await
            }
            ResolutionStrategy::NearLandmark { landmark } => {
                let tag = self.next_probe_tag();
                let landmark_json = Self::js_string(landmark);
                let script = format!(
                    r#"
                    (() => {{
                        const landmark = document.querySelector({landmark_json});
                        if (!landmark) return false;
                        const control = landmark.querySelector('input, textarea, select');
                        if (!control) return false;
                        control.setAttribute('data-ldr-probe', '{tag}');
                        return true;
                    }})()
                    "#
                );
                self.tag_match(script, &tag).await
            }
        }
    }

    async fn is_attached(&mut self, handle: &ElementHandle) -> EngineResult<bool> {
        if handle.epoch != self.epoch {
            return Ok(false);
        }
        let selector = Self::js_string(&handle.selector);
        self.eval_bool(format!(
            "document.querySelector({selector}) !== null"
        ))
        .await
    }

    async fn bounding_box(&mut self, handle: &ElementHandle) -> EngineResult<PageRect> {
        let element = self.element(handle).await?;
        let bbox = element
            .bounding_box()
            .await
            .map_err(|_| EngineError::Stale(handle.selector.clone()))?;
        Ok(PageRect {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
        })
    }

    async fn move_pointer(&mut self, point: PagePoint) -> EngineResult<()> {
        self.page.move_mouse(Point::new(point.x, point.y)).await?;
        Ok(())
    }

    async fn click(&mut self, handle: &ElementHandle) -> EngineResult<()> {
        let element = self.element(handle).await?;
        element
            .click()
            .await
            .map_err(|_| EngineError::Stale(handle.selector.clone()))?;
        Ok(())
    }

    async fn clear_value(&mut self, handle: &ElementHandle) -> EngineResult<()> {
        let selector = Self::js_string(&handle.selector);
        let cleared = self
            .eval_bool(format!(
                r#"
                (() => {{
                    const el = document.querySelector({selector});
                    if (!el) return false;
                    if ('value' in el) {{
                        el.value = '';
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    }}
                    return true;
                }})()
                "#
            ))
            .await?;
        if cleared {
            Ok(())
        } else {
            Err(EngineError::Stale(handle.selector.clone()))
        }
    }

    async fn press_key(&mut self, handle: &ElementHandle, key: &KeyInput) -> EngineResult<()> {
        let element = self.element(handle).await?;
        match key {
            KeyInput::Char(c) => {
                element
                    .type_str(c.to_string())
                    .await
                    .map_err(|_| EngineError::Stale(handle.selector.clone()))?;
            }
            KeyInput::Backspace => {
                element
                    .press_key("Backspace")
                    .await
                    .map_err(|_| EngineError::Stale(handle.selector.clone()))?;
            }
        }
        Ok(())
    }

    async fn read_value(&mut self, handle: &ElementHandle) -> EngineResult<String> {
        let selector = Self::js_string(&handle.selector);
        let script = format!(
            r#"
            (() => {{
                const el = document.querySelector({selector});
                if (!el) return null;
                if ('value' in el && el.value !== undefined) return String(el.value);
                return el.textContent || '';
            }})()
            "#
        );
        let value = self
            .page
            .evaluate(script)
            .await?
            .into_value::<Option<String>>()
            .map_err(|err| EngineError::Fatal(format!("readback returned non-string: {err}")))?;
        value.ok_or_else(|| EngineError::Stale(handle.selector.clone()))
    }

    async fn select_option(&mut self, handle: &ElementHandle, value: &str) -> EngineResult<()> {
        let selector = Self::js_string(&handle.selector);
        let wanted = Self::js_string(value);
        let applied = self
            .eval_bool(format!(
                r#"
                (() => {{
                    const el = document.querySelector({selector});
                    if (!el) return false;
                    const wanted = {wanted};
                    if (el.tagName === 'SELECT') {{
                        for (const option of el.options) {{
                            if (option.value === wanted || option.textContent.trim() === wanted) {{
                                el.value = option.value;
                                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                                return true;
                            }}
                        }}
                        return false;
                    }}
                    el.value = wanted;
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    return true;
                }})()
                "#
            ))
            .await?;
        if applied {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "option {value:?} in {}",
                handle.selector
            )))
        }
    }

    async fn upload_files(
        &mut self,
        handle: &ElementHandle,
        files: &[PathBuf],
    ) -> EngineResult<()> {
        let element = self.element(handle).await?;
        let file_list: Vec<String> = files
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        let params = SetFileInputFilesParams::builder()
            .files(file_list)
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(EngineError::Fatal)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> EngineResult<Vec<u8>> {
        let params = ScreenshotParams::builder().build();
        Ok(self.page.screenshot(params).await?)
    }
}
