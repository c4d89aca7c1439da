use common::SagaId;
use thiserror::Error;

use crate::status::{SagaStatus, StepStatus};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaStatus },

    /// A step is in an invalid state for the requested operation.
    #[error("Invalid step state for '{step}': {actual}")]
    InvalidStepState { step: String, actual: StepStatus },

    /// A saga step's forward action failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// The saga has already been started.
    #[error("Saga has already been started")]
    AlreadyStarted,

    /// The saga was not found in the repository.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
