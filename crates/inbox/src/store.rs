use async_trait::async_trait;
use chrono::Duration;
use common::MessageId;

use crate::Result;
use crate::message::{InboxMessage, InboxStatus};

/// Persistence port for inbox messages.
///
/// The external `message_id` is unique across the whole store;
/// [`try_add`] is the idempotency boundary that shields handlers from
/// at-least-once redelivery. As with the outbox, [`claim_processing`]
/// takes ownership of a row atomically.
///
/// [`try_add`]: InboxStore::try_add
/// [`claim_processing`]: InboxStore::claim_processing
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Ingests a message unless one with the same external `message_id`
    /// already exists. Returns the new row, or `None` for a duplicate —
    /// a duplicate never creates a row.
    async fn try_add(
        &self,
        message_id: &str,
        message_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<Option<InboxMessage>>;

    /// Retrieves a message by internal row ID.
    async fn get(&self, id: MessageId) -> Result<Option<InboxMessage>>;

    /// Retrieves a message by its external deduplication key.
    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<InboxMessage>>;

    /// Returns the oldest `Pending` message, if any.
    async fn get_next_pending(&self) -> Result<Option<InboxMessage>>;

    /// Returns up to `batch_size` `Pending` messages, oldest first.
    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxMessage>>;

    /// Returns `Failed` messages with fewer than `max_retries` attempts,
    /// ordered by last attempt time ascending.
    async fn get_failed(&self, max_retries: u32) -> Result<Vec<InboxMessage>>;

    /// Returns expired messages: `Processed`/`Discarded`/`Failed` rows
    /// older than `max_age`. Unlike the outbox, exhausted `Failed` rows
    /// are reclaimed here once they expire.
    async fn get_expired(&self, max_age: Duration) -> Result<Vec<InboxMessage>>;

    /// Atomically claims a message for processing.
    ///
    /// Succeeds only if the row is still `Pending` or `Failed`,
    /// transitioning it to `Processing`. Returns false when the row is
    /// missing or already claimed.
    async fn claim_processing(&self, id: MessageId) -> Result<bool>;

    /// Marks a `Processing` message as `Processed`.
    async fn mark_processed(&self, id: MessageId) -> Result<()>;

    /// Marks a `Processing` message as `Failed`, recording the error and
    /// incrementing the retry count.
    async fn mark_failed(&self, id: MessageId, error: &str, stack_trace: Option<&str>)
    -> Result<()>;

    /// Marks a `Processing` message as `Discarded` with the given reason.
    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()>;

    /// Deletes `Processed`, `Discarded`, and `Failed` messages older than
    /// `retention`. Returns the number of rows removed.
    async fn cleanup_old(&self, retention: Duration) -> Result<u64>;

    /// Counts messages currently in the given status.
    async fn count_by_status(&self, status: InboxStatus) -> Result<u64>;
}
