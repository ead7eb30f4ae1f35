use thiserror::Error;

use crate::listing::ListingError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no candidate strategy resolved field {0}")]
    NotFound(String),
    #[error("element handle went stale: {0}")]
    Stale(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("readback mismatch for {field}: wanted {expected:?}, read {found:?}")]
    ValidationMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("session authentication lost")]
    AuthenticationLost,
    #[error("rate limited by the target site")]
    RateLimited,
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session error: {0}")]
    Session(String),
    #[error("telemetry error: {0}")]
    Telemetry(String),
    #[error("invalid listing: {0}")]
    Listing(#[from] ListingError),
    #[error("unexpected failure: {0}")]
    Fatal(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Fatal(err.to_string())
    }
}
