//! Outbox message record and its status machine.

use chrono::{DateTime, Utc};
use common::MessageId;
use serde::{Deserialize, Serialize};

/// The status of an outbox message in its publishing lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ────────────► Publishing ──┬──► Published
///                          ▲         ├──► Discarded
/// Scheduled ──(due)────────┤         └──► Failed
///                          └──(retry)─────────┘
/// ```
///
/// `Published` and `Discarded` are terminal; a `Failed` message re-enters
/// `Publishing` only while its retry count is below the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    /// Waiting to be picked up by the processor.
    #[default]
    Pending,

    /// Waiting for its scheduled time before becoming eligible.
    Scheduled,

    /// Claimed by a processor; a publish attempt is in flight.
    Publishing,

    /// Successfully handed to a publisher (terminal state).
    Published,

    /// The last publish attempt failed; eligible for retry.
    Failed,

    /// No publisher accepted the message (terminal state).
    Discarded,
}

impl OutboxStatus {
    /// Returns true if a processor may claim a message in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            OutboxStatus::Pending | OutboxStatus::Scheduled | OutboxStatus::Failed
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Discarded)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::Scheduled => "Scheduled",
            OutboxStatus::Publishing => "Publishing",
            OutboxStatus::Published => "Published",
            OutboxStatus::Failed => "Failed",
            OutboxStatus::Discarded => "Discarded",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(OutboxStatus::Pending),
            "Scheduled" => Some(OutboxStatus::Scheduled),
            "Publishing" => Some(OutboxStatus::Publishing),
            "Published" => Some(OutboxStatus::Published),
            "Failed" => Some(OutboxStatus::Failed),
            "Discarded" => Some(OutboxStatus::Discarded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbound message persisted for asynchronous publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Immutable row identity.
    pub id: MessageId,

    /// The type of the message (e.g., "OrderPlaced").
    pub message_type: String,

    /// The serialized message body, opaque to the outbox.
    pub payload: serde_json::Value,

    /// Where the message should be delivered (queue, topic, endpoint name).
    pub destination: String,

    /// Correlates this message with the business operation that produced it.
    pub correlation_id: Option<String>,

    /// Current lifecycle status.
    pub status: OutboxStatus,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the message was successfully published.
    pub published_at: Option<DateTime<Utc>>,

    /// When the last publish attempt was made.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Number of failed publish attempts.
    pub retry_count: u32,

    /// Error message from the last failed attempt.
    pub error_message: Option<String>,

    /// Diagnostic detail from the last failed attempt.
    pub stack_trace: Option<String>,

    /// Earliest time a scheduled message becomes eligible.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Creates a new `Pending` message.
    pub fn new(
        message_type: impl Into<String>,
        payload: serde_json::Value,
        destination: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type: message_type.into(),
            payload,
            destination: destination.into(),
            correlation_id,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            published_at: None,
            last_attempt_at: None,
            retry_count: 0,
            error_message: None,
            stack_trace: None,
            scheduled_at: None,
        }
    }

    /// Creates a new `Scheduled` message that becomes eligible at `scheduled_at`.
    pub fn scheduled(
        message_type: impl Into<String>,
        payload: serde_json::Value,
        destination: impl Into<String>,
        correlation_id: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let mut message = Self::new(message_type, payload, destination, correlation_id);
        message.status = OutboxStatus::Scheduled;
        message.scheduled_at = Some(scheduled_at);
        message
    }

    /// Returns true if the message is eligible for another publish attempt.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count < max_retries
    }

    /// Returns true if the message is eligible for publishing at `now`.
    ///
    /// A `Pending` message is always ready; a `Scheduled` one only once its
    /// scheduled time has passed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Scheduled => self.scheduled_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }
}
