pub mod config;
pub mod engine;
pub mod error;
pub mod listing;
pub mod session;

pub use config::{load_engine_config, BehaviorProfile, EngineConfig};
pub use engine::{
    DomLocator, EngineError, EngineResult, FillState, FillTelemetry, FormFillingStateMachine,
    InputSynthesizer, PageDriver, SubmissionReport,
};
pub use error::{ConfigError, Result};
pub use listing::{
    AttemptOutcome, AttemptRecord, AttemptTrail, FieldDescriptor, FieldRegistry, InteractionPlan,
    ListingError, ListingKind, ListingRequest, ResolutionStrategy,
};
pub use session::{
    BrowserSession, CdpDriver, FileSessionStore, SessionCookie, SessionLauncher, SessionState,
};
