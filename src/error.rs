/// Crate-wide error taxonomy. Each task-local error localizes to its own
/// module; only `StorageUnavailable` and `Fatal` are meant to escape a
/// task boundary (see the scheduler loops in `ingestor` and `predictor`).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream returned malformed data: {0}")]
    UpstreamProtocol(String),

    #[error("insufficient data for horizon {horizon}m: need {needed} minutes, have {available}")]
    InsufficientData {
        horizon: u32,
        needed: usize,
        available: usize,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    #[error("model artifact error: {0}")]
    ModelArtifact(String),

    #[error("malformed client frame: {0}")]
    ClientProtocol(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// True for errors that the `/health` and HTTP layers should report as 503.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}
