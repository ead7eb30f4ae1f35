use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::config::RecoverySection;
use crate::listing::AttemptOutcome;

use super::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Structural,
    Fatal,
}

impl FailureClass {
    pub fn as_outcome(&self) -> AttemptOutcome {
        match self {
            FailureClass::Transient => AttemptOutcome::Transient,
            FailureClass::Structural => AttemptOutcome::Structural,
            FailureClass::Fatal => AttemptOutcome::Fatal,
        }
    }
}

/// What the state machine should do about one classified step failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait, then retry the same step in place.
    Backoff(Duration),
    /// Reload from the known-good anchor, re-derive plan position, retry
    /// the step exactly once.
    Reanchor,
    /// Both budgets exhausted; the field's outcome is terminal.
    GiveUpField,
    /// Abort the whole plan immediately.
    Abort,
}

pub fn classify(error: &EngineError) -> FailureClass {
    match error {
        EngineError::NotFound(_) => FailureClass::Structural,
        EngineError::Stale(_)
        | EngineError::Timeout(_)
        | EngineError::ValidationMismatch { .. } => FailureClass::Transient,
        EngineError::AuthenticationLost | EngineError::RateLimited => FailureClass::Fatal,
        EngineError::Cdp(err) => {
            if err.to_string().to_lowercase().contains("timeout") {
                FailureClass::Transient
            } else {
                FailureClass::Fatal
            }
        }
        EngineError::Io(_)
        | EngineError::Launch(_)
        | EngineError::Session(_)
        | EngineError::Telemetry(_)
        | EngineError::Listing(_)
        | EngineError::Fatal(_) => FailureClass::Fatal,
    }
}

/// Per-step retry accounting. Transient and structural budgets are
/// independent; neither resets when the other escalates.
#[derive(Debug, Default, Clone)]
pub struct StepBudget {
    transient_used: usize,
    structural_used: usize,
}

impl StepBudget {
    pub fn transient_used(&self) -> usize {
        self.transient_used
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryController {
    config: RecoverySection,
}

impl RecoveryController {
    pub fn new(config: RecoverySection) -> Self {
        Self { config }
    }

    pub fn budget(&self) -> StepBudget {
        StepBudget::default()
    }

    pub fn decide(&self, budget: &mut StepBudget, class: FailureClass) -> RecoveryAction {
        match class {
            FailureClass::Fatal => RecoveryAction::Abort,
            FailureClass::Transient => {
                if budget.transient_used >= self.config.transient_retries {
                    RecoveryAction::GiveUpField
                } else {
                    let delay = self.backoff_delay(budget.transient_used);
                    budget.transient_used += 1;
                    RecoveryAction::Backoff(delay)
                }
            }
            FailureClass::Structural => {
                if budget.structural_used >= 1 {
                    RecoveryAction::GiveUpField
                } else {
                    budget.structural_used += 1;
                    RecoveryAction::Reanchor
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let base = self.config.backoff_base_ms as f64;
        let scaled = base * self.config.backoff_factor.max(1.0).powi(attempt as i32);
        let capped = scaled.min(self.config.backoff_cap_ms as f64) as u64;
        let jitter = if self.config.backoff_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.backoff_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}
