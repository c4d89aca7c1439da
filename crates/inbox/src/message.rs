//! Inbox message record and its status machine.

use chrono::{DateTime, Utc};
use common::MessageId;
use serde::{Deserialize, Serialize};

/// The status of an inbox message in its consumption lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Processing ──┬──► Processed
///                ▲         ├──► Discarded
///                │         └──► Failed
///                └──(retry)────────┘
/// ```
///
/// `Processed` and `Discarded` are terminal; a `Failed` message re-enters
/// `Processing` only while its retry count is below the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InboxStatus {
    /// Ingested and waiting to be picked up by the processor.
    #[default]
    Pending,

    /// Claimed by a processor; a handler invocation is in flight.
    Processing,

    /// Successfully handled (terminal state).
    Processed,

    /// The last handling attempt failed; eligible for retry.
    Failed,

    /// No handler accepted the message type (terminal state).
    Discarded,
}

impl InboxStatus {
    /// Returns true if a processor may claim a message in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(self, InboxStatus::Pending | InboxStatus::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboxStatus::Processed | InboxStatus::Discarded)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "Pending",
            InboxStatus::Processing => "Processing",
            InboxStatus::Processed => "Processed",
            InboxStatus::Failed => "Failed",
            InboxStatus::Discarded => "Discarded",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(InboxStatus::Pending),
            "Processing" => Some(InboxStatus::Processing),
            "Processed" => Some(InboxStatus::Processed),
            "Failed" => Some(InboxStatus::Failed),
            "Discarded" => Some(InboxStatus::Discarded),
            _ => None,
        }
    }
}

impl std::fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An inbound message persisted for idempotent consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    /// Internal row identity.
    pub id: MessageId,

    /// External deduplication key, unique across the whole store.
    pub message_id: String,

    /// The type of the message, used for handler resolution.
    pub message_type: String,

    /// The serialized message body, opaque to the inbox.
    pub payload: serde_json::Value,

    /// Where the message came from (queue, topic, producing service).
    pub source: String,

    /// Current lifecycle status.
    pub status: InboxStatus,

    /// When the row was created.
    pub received_at: DateTime<Utc>,

    /// When the message was successfully handled.
    pub processed_at: Option<DateTime<Utc>>,

    /// When the last handling attempt was made.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Number of failed handling attempts.
    pub retry_count: u32,

    /// Error message from the last failed attempt.
    pub error_message: Option<String>,

    /// Diagnostic detail from the last failed attempt.
    pub stack_trace: Option<String>,
}

impl InboxMessage {
    /// Creates a new `Pending` message.
    pub fn new(
        message_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_id: message_id.into(),
            message_type: message_type.into(),
            payload,
            source: source.into(),
            status: InboxStatus::Pending,
            received_at: Utc::now(),
            processed_at: None,
            last_attempt_at: None,
            retry_count: 0,
            error_message: None,
            stack_trace: None,
        }
    }

    /// Returns true if the message is eligible for another handling attempt.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.status == InboxStatus::Failed && self.retry_count < max_retries
    }
}
