use common::MessageId;
use thiserror::Error;

use crate::message::OutboxStatus;

/// Errors that can occur when interacting with the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The message was not found in the store.
    #[error("Outbox message not found: {0}")]
    NotFound(MessageId),

    /// A status transition was attempted that the state machine forbids.
    #[error("Invalid transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: OutboxStatus,
        to: OutboxStatus,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
