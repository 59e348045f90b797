//! Flowcast error taxonomy.

use thiserror::Error;

/// Every error Flowcast can surface.
///
/// Only `Validation`, `NotFound` and `QueueUnavailable` are expected to reach
/// API callers. Channel, plan and delegate errors are contained inside an
/// execution and recorded in its results.
#[derive(Debug, Error)]
pub enum FlowcastError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Unknown distributor: {0}")]
    UnknownDistributor(String),

    #[error("Delegated engine timed out after {attempts} polls")]
    DelegateTimeout { attempts: u32 },

    #[error("Delegated engine failure: {0}")]
    DelegateFailure(String),

    #[error("Plan generation failed: {0}")]
    Plan(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FlowcastError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// HTTP-style status category for API callers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Json(_) => 400,
            Self::NotFound(_) => 404,
            Self::QueueUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::UnknownDistributor(_) => "unknown_distributor",
            Self::DelegateTimeout { .. } => "delegate_timeout",
            Self::DelegateFailure(_) => "delegate_failure",
            Self::Json(_) => "invalid_json",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowcastError>;
