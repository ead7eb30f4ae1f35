mod driver;
mod error;
mod human;
mod locator;
mod machine;
mod recovery;
mod telemetry;

pub use driver::{ElementHandle, KeyInput, PageDriver, PagePoint, PageRect};
pub use error::{EngineError, EngineResult};
pub use human::{InputSynthesizer, KeyEvent, PointerPath, TimedPoint};
pub use locator::{normalize_label, DomLocator, Resolution};
pub use machine::{FillState, FormFillingStateMachine, SubmissionReport};
pub use recovery::{classify, FailureClass, RecoveryAction, RecoveryController, StepBudget};
pub use telemetry::{FillTelemetry, RunSummary, TelemetryError};
