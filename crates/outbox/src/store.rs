use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::MessageId;

use crate::Result;
use crate::message::{OutboxMessage, OutboxStatus};

/// Persistence port for outbox messages.
///
/// All implementations must be thread-safe (Send + Sync). Two processor
/// instances may poll the same store concurrently; [`claim_publishing`]
/// is the only operation that takes ownership of a row, and it does so
/// atomically so a row is never double-processed.
///
/// [`claim_publishing`]: OutboxStore::claim_publishing
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Creates a `Pending` message and returns the stored row.
    async fn add(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
    ) -> Result<OutboxMessage>;

    /// Creates a `Scheduled` message that becomes eligible at `scheduled_at`.
    async fn schedule(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<OutboxMessage>;

    /// Retrieves a message by ID.
    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>>;

    /// Returns the oldest `Pending` message, if any.
    async fn get_next_pending(&self) -> Result<Option<OutboxMessage>>;

    /// Returns up to `batch_size` `Pending` messages, oldest first.
    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>>;

    /// Returns up to `batch_size` messages eligible for publishing:
    /// `Pending` rows plus `Scheduled` rows whose time has come,
    /// ordered by creation time ascending.
    async fn get_ready_to_publish(&self, batch_size: usize) -> Result<Vec<OutboxMessage>>;

    /// Returns `Failed` messages with fewer than `max_retries` attempts,
    /// ordered by last attempt time ascending.
    async fn get_failed(&self, max_retries: u32) -> Result<Vec<OutboxMessage>>;

    /// Returns terminal messages older than `max_age`.
    async fn get_expired(&self, max_age: Duration) -> Result<Vec<OutboxMessage>>;

    /// Atomically claims a message for publishing.
    ///
    /// Succeeds only if the row is still in a claimable state (`Pending`,
    /// due-`Scheduled`, or `Failed`), transitioning it to `Publishing`.
    /// Returns false when the row is missing, already claimed, or not yet
    /// due, in which case the caller must skip it.
    async fn claim_publishing(&self, id: MessageId) -> Result<bool>;

    /// Marks a `Publishing` message as `Published`.
    async fn mark_published(&self, id: MessageId) -> Result<()>;

    /// Marks a `Publishing` message as `Failed`, recording the error and
    /// incrementing the retry count.
    async fn mark_failed(&self, id: MessageId, error: &str, stack_trace: Option<&str>)
    -> Result<()>;

    /// Marks a `Publishing` message as `Discarded` with the given reason.
    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()>;

    /// Deletes terminal messages older than `retention`.
    /// Returns the number of rows removed.
    async fn cleanup_old(&self, retention: Duration) -> Result<u64>;

    /// Counts messages currently in the given status.
    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64>;
}
