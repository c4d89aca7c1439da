use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::MessageId;
use tokio::sync::RwLock;

use crate::message::{OutboxMessage, OutboxStatus};
use crate::store::OutboxStore;
use crate::{OutboxError, Result};

/// In-memory outbox store implementation for testing.
///
/// This implementation stores all messages in memory and provides
/// the same interface as the PostgreSQL implementation, including the
/// atomic claim semantics (the claim predicate is evaluated under the
/// write lock).
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    messages: Arc<RwLock<HashMap<MessageId, OutboxMessage>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of messages stored.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Clears all messages.
    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }

    /// Inserts a fully-formed row, bypassing the constructors.
    /// Used to seed specific states in tests.
    pub async fn put(&self, message: OutboxMessage) {
        self.messages.write().await.insert(message.id, message);
    }

    async fn transition(
        &self,
        id: MessageId,
        from: OutboxStatus,
        to: OutboxStatus,
        apply: impl FnOnce(&mut OutboxMessage),
    ) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(&id).ok_or(OutboxError::NotFound(id))?;

        if message.status != from {
            return Err(OutboxError::InvalidTransition {
                id,
                from: message.status,
                to,
            });
        }

        message.status = to;
        apply(message);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
    ) -> Result<OutboxMessage> {
        let message = OutboxMessage::new(message_type, payload, destination, correlation_id);
        self.messages
            .write()
            .await
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn schedule(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<OutboxMessage> {
        let message = OutboxMessage::scheduled(
            message_type,
            payload,
            destination,
            correlation_id,
            scheduled_at,
        );
        self.messages
            .write()
            .await
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn get_next_pending(&self) -> Result<Option<OutboxMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .min_by_key(|m| m.created_at)
            .cloned())
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>> {
        let messages = self.messages.read().await;
        let mut pending: Vec<_> = messages
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn get_ready_to_publish(&self, batch_size: usize) -> Result<Vec<OutboxMessage>> {
        let now = Utc::now();
        let messages = self.messages.read().await;
        let mut ready: Vec<_> = messages
            .values()
            .filter(|m| m.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by_key(|m| m.created_at);
        ready.truncate(batch_size);
        Ok(ready)
    }

    async fn get_failed(&self, max_retries: u32) -> Result<Vec<OutboxMessage>> {
        let messages = self.messages.read().await;
        let mut failed: Vec<_> = messages
            .values()
            .filter(|m| m.can_retry(max_retries))
            .cloned()
            .collect();
        failed.sort_by_key(|m| m.last_attempt_at);
        Ok(failed)
    }

    async fn get_expired(&self, max_age: Duration) -> Result<Vec<OutboxMessage>> {
        let cutoff = Utc::now() - max_age;
        let messages = self.messages.read().await;
        let mut expired: Vec<_> = messages
            .values()
            .filter(|m| m.status.is_terminal() && m.created_at < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|m| m.created_at);
        Ok(expired)
    }

    async fn claim_publishing(&self, id: MessageId) -> Result<bool> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;
        let Some(message) = messages.get_mut(&id) else {
            return Ok(false);
        };

        let claimable = match message.status {
            OutboxStatus::Pending | OutboxStatus::Failed => true,
            OutboxStatus::Scheduled => message.scheduled_at.is_some_and(|at| at <= now),
            _ => false,
        };
        if !claimable {
            return Ok(false);
        }

        message.status = OutboxStatus::Publishing;
        message.last_attempt_at = Some(now);
        Ok(true)
    }

    async fn mark_published(&self, id: MessageId) -> Result<()> {
        self.transition(id, OutboxStatus::Publishing, OutboxStatus::Published, |m| {
            m.published_at = Some(Utc::now());
            m.error_message = None;
            m.stack_trace = None;
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: MessageId,
        error: &str,
        stack_trace: Option<&str>,
    ) -> Result<()> {
        self.transition(id, OutboxStatus::Publishing, OutboxStatus::Failed, |m| {
            m.retry_count += 1;
            m.last_attempt_at = Some(Utc::now());
            m.error_message = Some(error.to_string());
            m.stack_trace = stack_trace.map(str::to_string);
        })
        .await
    }

    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()> {
        self.transition(id, OutboxStatus::Publishing, OutboxStatus::Discarded, |m| {
            m.error_message = Some(reason.to_string());
        })
        .await
    }

    async fn cleanup_old(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, m| !(m.status.is_terminal() && m.created_at < cutoff));
        Ok((before - messages.len()) as u64)
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64> {
        let messages = self.messages.read().await;
        Ok(messages.values().filter(|m| m.status == status).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn add_message(store: &InMemoryOutboxStore, destination: &str) -> OutboxMessage {
        store
            .add(
                "TestMessage",
                serde_json::json!({"n": 1}),
                destination,
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_creates_pending_row() {
        let store = InMemoryOutboxStore::new();
        let message = add_message(&store, "orders").await;

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.destination, "orders");
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn ready_batch_is_ordered_and_bounded() {
        let store = InMemoryOutboxStore::new();
        let first = add_message(&store, "a").await;
        let second = add_message(&store, "b").await;
        let third = add_message(&store, "c").await;

        let ready = store.get_ready_to_publish(2).await.unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].id, first.id);
        assert_eq!(ready[1].id, second.id);

        let all = store.get_ready_to_publish(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, third.id);
    }

    #[tokio::test]
    async fn scheduled_message_excluded_until_due() {
        let store = InMemoryOutboxStore::new();
        let future = store
            .schedule(
                "T",
                serde_json::json!({}),
                "d",
                None,
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();
        let due = store
            .schedule(
                "T",
                serde_json::json!({}),
                "d",
                None,
                Utc::now() - Duration::seconds(1),
            )
            .await
            .unwrap();

        let ready = store.get_ready_to_publish(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due.id);
        assert!(ready.iter().all(|m| m.id != future.id));
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryOutboxStore::new();
        let message = add_message(&store, "orders").await;

        assert!(store.claim_publishing(message.id).await.unwrap());
        // Second claim must lose: the row is already Publishing.
        assert!(!store.claim_publishing(message.id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_respects_schedule_gate() {
        let store = InMemoryOutboxStore::new();
        let future = store
            .schedule(
                "T",
                serde_json::json!({}),
                "d",
                None,
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();

        assert!(!store.claim_publishing(future.id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_missing_row_returns_false() {
        let store = InMemoryOutboxStore::new();
        assert!(!store.claim_publishing(MessageId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn mark_failed_increments_retry_count() {
        let store = InMemoryOutboxStore::new();
        let message = add_message(&store, "orders").await;

        store.claim_publishing(message.id).await.unwrap();
        store
            .mark_failed(message.id, "broker unavailable", None)
            .await
            .unwrap();

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("broker unavailable"));
        assert!(stored.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn mark_published_from_wrong_state_is_rejected() {
        let store = InMemoryOutboxStore::new();
        let message = add_message(&store, "orders").await;

        let result = store.mark_published(message.id).await;
        assert!(matches!(
            result,
            Err(OutboxError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn failed_selection_respects_retry_bound() {
        let store = InMemoryOutboxStore::new();
        let message = add_message(&store, "orders").await;

        for _ in 0..3 {
            store.claim_publishing(message.id).await.unwrap();
            store.mark_failed(message.id, "boom", None).await.unwrap();
        }

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 3);

        // Exhausted: excluded from the retry selection.
        let failed = store.get_failed(3).await.unwrap();
        assert!(failed.is_empty());

        // A higher bound makes it visible again.
        let failed = store.get_failed(4).await.unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_rows() {
        let store = InMemoryOutboxStore::new();

        let mut old_published = OutboxMessage::new("T", serde_json::json!({}), "d", None);
        old_published.status = OutboxStatus::Published;
        old_published.created_at = Utc::now() - Duration::days(40);
        store.put(old_published).await;

        let mut old_failed = OutboxMessage::new("T", serde_json::json!({}), "d", None);
        old_failed.status = OutboxStatus::Failed;
        old_failed.created_at = Utc::now() - Duration::days(40);
        store.put(old_failed).await;

        add_message(&store, "d").await;

        let removed = store.cleanup_old(Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.message_count().await, 2);

        // Second pass with no new terminal rows is a no-op.
        let removed = store.cleanup_old(Duration::days(30)).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn count_by_status() {
        let store = InMemoryOutboxStore::new();
        add_message(&store, "a").await;
        add_message(&store, "b").await;

        assert_eq!(
            store.count_by_status(OutboxStatus::Pending).await.unwrap(),
            2
        );
        assert_eq!(
            store
                .count_by_status(OutboxStatus::Published)
                .await
                .unwrap(),
            0
        );
    }
}
