//! Adapter error taxonomy shared by the outbox and inbox processors.
//!
//! Publisher and handler adapters report failures through [`AdapterError`].
//! Both processing loops classify these errors the same way: an adapter
//! failure marks the message `Failed` (eligible for retry up to the
//! configured maximum), a missing route marks it `Discarded`, and anything
//! outside the adapter boundary (store errors) propagates to the caller.

use thiserror::Error;

/// An error returned by a publisher or handler adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// The adapter was asked to do something its current state forbids.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The message contents were rejected by the adapter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other adapter-level failure.
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Classifies this error for logging and retry accounting.
    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Timeout(_) | AdapterError::Cancelled | AdapterError::Other(_) => {
                ErrorClass::Transient
            }
            AdapterError::InvalidOperation(_) | AdapterError::InvalidArgument(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

/// Coarse classification of a delivery failure.
///
/// Both the outbox and inbox loops use the same classification: `Transient`
/// and `Permanent` adapter failures mark the message `Failed`, `NoRoute`
/// marks it `Discarded` and is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The failure may succeed on a later attempt.
    Transient,

    /// The failure will not resolve on its own; retries will exhaust.
    Permanent,

    /// No adapter accepted the message's destination or type.
    NoRoute,
}

impl ErrorClass {
    /// Returns the class name as a string, for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::NoRoute => "no_route",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
