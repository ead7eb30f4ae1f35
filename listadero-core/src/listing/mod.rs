mod attempt;
mod models;
mod plan;
mod registry;

pub use attempt::{AttemptOutcome, AttemptRecord, AttemptTrail};
pub use models::{ListingError, ListingKind, ListingRequest};
pub use plan::{InteractionPlan, Step, StepAction};
pub use registry::{
    FieldDescriptor, FieldRegistry, InputKind, ResolutionStrategy, ValueFormat, REGISTRY_VERSION,
};
