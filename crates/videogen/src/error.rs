use uuid::Uuid;

use crate::billing::BillingError;
use crate::engines::EngineError;
use crate::videos::status::VideoStatus;
use crate::videos::store::StoreError;

/// Errors surfaced by the video orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    /// Bad option bag or missing input. The message is shown to the caller as is.
    #[error("{0}")]
    Validation(String),

    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    #[error("{0}")]
    InsufficientFunds(String),

    #[error("video {0} not found")]
    NotFound(Uuid),

    #[error("video is already {0}")]
    AlreadyFinished(VideoStatus),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: VideoStatus, to: VideoStatus },

    #[error(transparent)]
    Engine(EngineError),

    #[error(transparent)]
    Billing(BillingError),

    #[error(transparent)]
    Store(StoreError),
}

impl VideoError {
    pub fn code(&self) -> &'static str {
        match self {
            VideoError::Validation(_) => "VALIDATION_ERROR",
            VideoError::EngineNotFound(_) => "UNKNOWN_ENGINE",
            VideoError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            VideoError::NotFound(_) => "NOT_FOUND",
            VideoError::AlreadyFinished(_) => "ALREADY_FINISHED",
            VideoError::InvalidTransition { .. } => "INVALID_TRANSITION",
            VideoError::Engine(e) => e.code(),
            VideoError::Billing(_) => "BILLING_UNAVAILABLE",
            VideoError::Store(StoreError::Conflict(_)) => "CONFLICT",
            VideoError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<EngineError> for VideoError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(name) => VideoError::EngineNotFound(name),
            EngineError::InvalidOptions(msg) => VideoError::Validation(msg),
            other => VideoError::Engine(other),
        }
    }
}

impl From<BillingError> for VideoError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientFunds(msg) => VideoError::InsufficientFunds(msg),
            other => VideoError::Billing(other),
        }
    }
}

impl From<StoreError> for VideoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => VideoError::NotFound(id),
            other => VideoError::Store(other),
        }
    }
}
