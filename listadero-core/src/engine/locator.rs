use std::time::Duration;

use regex::Regex;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::config::LocatorSection;
use crate::listing::FieldDescriptor;

use super::driver::{ElementHandle, PageDriver};
use super::error::{EngineError, EngineResult};

/// Result of a staleness check: the usable handle, plus whether the locator
/// had to re-resolve it. A refresh is surfaced so the caller can record a
/// transient attempt instead of folding it into success.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub handle: ElementHandle,
    pub refreshed: bool,
}

/// Collapse whitespace and case the way label text is compared on-page, so
/// descriptor text and DOM text normalize identically on both sides of the
/// probe.
pub fn normalize_label(text: &str) -> String {
    let whitespace = Regex::new(r"\s+").expect("static regex");
    whitespace.replace_all(text.trim(), " ").to_lowercase()
}

/// Resolves a [`FieldDescriptor`] against the live page by walking its
/// candidate strategies in priority order, each probe bounded by a short
/// timeout and the whole walk by a total budget.
#[derive(Debug)]
pub struct DomLocator {
    probe_timeout: Duration,
    probe_budget: Duration,
}

impl DomLocator {
    pub fn new(config: &LocatorSection) -> Self {
        Self {
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            probe_budget: Duration::from_millis(config.probe_budget_ms),
        }
    }

    pub async fn resolve(
        &self,
        driver: &mut dyn PageDriver,
        field: &FieldDescriptor,
    ) -> EngineResult<ElementHandle> {
        let started = Instant::now();
        for (rank, strategy) in field.strategies.iter().enumerate() {
            let elapsed = started.elapsed();
            if elapsed >= self.probe_budget {
                return Err(EngineError::Timeout(format!(
                    "locator probe budget for field {}",
                    field.key
                )));
            }
            let probe = self.probe_timeout.min(self.probe_budget - elapsed);
            match timeout(probe, driver.query(strategy)).await {
                Ok(Ok(Some(handle))) => {
                    trace!(field = %field.key, rank, "strategy resolved field");
                    return Ok(handle);
                }
                Ok(Ok(None)) => continue,
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    debug!(field = %field.key, rank, "strategy probe timed out");
                    continue;
                }
            }
        }
        Err(EngineError::NotFound(field.key.clone()))
    }

    /// Validate a previously resolved handle before use. Handles from an
    /// older navigation epoch, or detached from the document, are
    /// re-resolved from the descriptor.
    pub async fn ensure_attached(
        &self,
        driver: &mut dyn PageDriver,
        field: &FieldDescriptor,
        handle: ElementHandle,
    ) -> EngineResult<Resolution> {
        if handle.epoch == driver.epoch() && driver.is_attached(&handle).await? {
            return Ok(Resolution {
                handle,
                refreshed: false,
            });
        }
        debug!(field = %field.key, "handle stale, re-resolving");
        let fresh = self.resolve(driver, field).await?;
        Ok(Resolution {
            handle: fresh,
            refreshed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::config::LocatorSection;
    use crate::engine::driver::{KeyInput, PagePoint, PageRect};
    use crate::listing::{FieldDescriptor, InputKind, ResolutionStrategy, ValueFormat};

    #[derive(Default)]
    struct ProbeDriver {
        /// css selectors that resolve, mapped to attachment state
        present: HashMap<String, bool>,
        epoch: u64,
        queries: Vec<ResolutionStrategy>,
    }

    #[async_trait(?Send)]
    impl PageDriver for ProbeDriver {
        async fn navigate(&mut self, _url: &str) -> EngineResult<()> {
            self.epoch += 1;
            Ok(())
        }

        fn epoch(&self) -> u64 {
            self.epoch
        }

        async fn current_url(&mut self) -> EngineResult<String> {
            Ok("about:blank".to_string())
        }

        async fn query(
            &mut self,
            strategy: &ResolutionStrategy,
        ) -> EngineResult<Option<ElementHandle>> {
            self.queries.push(strategy.clone());
            if let ResolutionStrategy::Css(selector) = strategy {
                if self.present.contains_key(selector) {
                    return Ok(Some(ElementHandle {
                        selector: selector.clone(),
                        epoch: self.epoch,
                    }));
                }
            }
            Ok(None)
        }

        async fn is_attached(&mut self, handle: &ElementHandle) -> EngineResult<bool> {
            Ok(*self.present.get(&handle.selector).unwrap_or(&false))
        }

        async fn bounding_box(&mut self, _handle: &ElementHandle) -> EngineResult<PageRect> {
            Ok(PageRect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            })
        }

        async fn move_pointer(&mut self, _point: PagePoint) -> EngineResult<()> {
            Ok(())
        }

        async fn click(&mut self, _handle: &ElementHandle) -> EngineResult<()> {
            Ok(())
        }

        async fn clear_value(&mut self, _handle: &ElementHandle) -> EngineResult<()> {
            Ok(())
        }

        async fn press_key(
            &mut self,
            _handle: &ElementHandle,
            _key: &KeyInput,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn read_value(&mut self, _handle: &ElementHandle) -> EngineResult<String> {
            Ok(String::new())
        }

        async fn select_option(
            &mut self,
            _handle: &ElementHandle,
            _value: &str,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn upload_files(
            &mut self,
            _handle: &ElementHandle,
            _files: &[PathBuf],
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn screenshot(&mut self) -> EngineResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn field_with(strategies: Vec<ResolutionStrategy>) -> FieldDescriptor {
        FieldDescriptor {
            key: "precio".to_string(),
            strategies,
            required: false,
            format: ValueFormat::Currency,
            input: InputKind::Text,
        }
    }

    fn locator() -> DomLocator {
        DomLocator::new(&LocatorSection::default())
    }

    #[tokio::test]
    async fn falls_through_to_the_first_resolving_strategy() {
        let mut driver = ProbeDriver::default();
        driver.present.insert("#real".to_string(), true);
        let field = field_with(vec![
            ResolutionStrategy::Css("#missing-a".to_string()),
            ResolutionStrategy::LabelText("Precio".to_string()),
            ResolutionStrategy::Css("#real".to_string()),
        ]);
        let handle = locator().resolve(&mut driver, &field).await.unwrap();
        assert_eq!(handle.selector, "#real");
        assert_eq!(driver.queries.len(), 3);
    }

    #[tokio::test]
    async fn not_found_only_after_every_candidate() {
        let mut driver = ProbeDriver::default();
        let field = field_with(vec![
            ResolutionStrategy::Css("#a".to_string()),
            ResolutionStrategy::Css("#b".to_string()),
            ResolutionStrategy::Css("#c".to_string()),
        ]);
        let err = locator().resolve(&mut driver, &field).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(driver.queries.len(), 3);
    }

    #[tokio::test]
    async fn attached_current_epoch_handle_is_kept() {
        let mut driver = ProbeDriver::default();
        driver.present.insert("#precio".to_string(), true);
        let field = field_with(vec![ResolutionStrategy::Css("#precio".to_string())]);
        let locator = locator();
        let handle = locator.resolve(&mut driver, &field).await.unwrap();
        let resolution = locator
            .ensure_attached(&mut driver, &field, handle)
            .await
            .unwrap();
        assert!(!resolution.refreshed);
    }

    #[tokio::test]
    async fn handle_from_older_epoch_is_re_resolved() {
        let mut driver = ProbeDriver::default();
        driver.present.insert("#precio".to_string(), true);
        let field = field_with(vec![ResolutionStrategy::Css("#precio".to_string())]);
        let locator = locator();
        let handle = locator.resolve(&mut driver, &field).await.unwrap();
        driver.navigate("https://elsewhere").await.unwrap();
        let resolution = locator
            .ensure_attached(&mut driver, &field, handle)
            .await
            .unwrap();
        assert!(resolution.refreshed);
        assert_eq!(resolution.handle.epoch, 1);
    }

    #[tokio::test]
    async fn detached_handle_is_re_resolved() {
        let mut driver = ProbeDriver::default();
        driver.present.insert("#precio".to_string(), false);
        let field = field_with(vec![ResolutionStrategy::Css("#precio".to_string())]);
        let locator = locator();
        let stale = ElementHandle {
            selector: "#precio".to_string(),
            epoch: 0,
        };
        let resolution = locator
            .ensure_attached(&mut driver, &field, stale)
            .await
            .unwrap();
        assert!(resolution.refreshed);
    }

    #[test]
    fn label_normalization_collapses_whitespace() {
        assert_eq!(
            normalize_label("  Tipo   de\npropiedad "),
            "tipo de propiedad"
        );
    }
}
