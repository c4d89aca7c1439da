use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::MessageId;
use tokio::sync::RwLock;

use crate::message::{InboxMessage, InboxStatus};
use crate::store::InboxStore;
use crate::{InboxError, Result};

/// In-memory inbox store implementation for testing.
///
/// The deduplication check and the insert happen under one write lock,
/// mirroring the unique-index guarantee of the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryInboxStore {
    messages: Arc<RwLock<HashMap<MessageId, InboxMessage>>>,
}

impl InMemoryInboxStore {
    /// Creates a new empty in-memory inbox store.
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

    /// Inserts a fully-formed row, bypassing ingestion.
    /// Used to seed specific states in tests.
    pub async fn put(&self, message: InboxMessage) {
        self.messages.write().await.insert(message.id, message);
    }

    async fn transition(
        &self,
        id: MessageId,
        from: InboxStatus,
        to: InboxStatus,
        apply: impl FnOnce(&mut InboxMessage),
    ) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(&id).ok_or(InboxError::NotFound(id))?;

        if message.status != from {
            return Err(InboxError::InvalidTransition {
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
impl InboxStore for InMemoryInboxStore {
    async fn try_add(
        &self,
        message_id: &str,
        message_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<Option<InboxMessage>> {
        let mut messages = self.messages.write().await;

        if messages.values().any(|m| m.message_id == message_id) {
            return Ok(None);
        }

        let message = InboxMessage::new(message_id, message_type, payload, source);
        messages.insert(message.id, message.clone());
        Ok(Some(message))
    }

    async fn get(&self, id: MessageId) -> Result<Option<InboxMessage>> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<InboxMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .find(|m| m.message_id == message_id)
            .cloned())
    }

    async fn get_next_pending(&self) -> Result<Option<InboxMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.status == InboxStatus::Pending)
            .min_by_key(|m| m.received_at)
            .cloned())
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxMessage>> {
        let messages = self.messages.read().await;
        let mut pending: Vec<_> = messages
            .values()
            .filter(|m| m.status == InboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.received_at);
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn get_failed(&self, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let messages = self.messages.read().await;
        let mut failed: Vec<_> = messages
            .values()
            .filter(|m| m.can_retry(max_retries))
            .cloned()
            .collect();
        failed.sort_by_key(|m| m.last_attempt_at);
        Ok(failed)
    }

    async fn get_expired(&self, max_age: Duration) -> Result<Vec<InboxMessage>> {
        let cutoff = Utc::now() - max_age;
        let messages = self.messages.read().await;
        let mut expired: Vec<_> = messages
            .values()
            .filter(|m| {
                (m.status.is_terminal() || m.status == InboxStatus::Failed)
                    && m.received_at < cutoff
            })
            .cloned()
            .collect();
        expired.sort_by_key(|m| m.received_at);
        Ok(expired)
    }

    async fn claim_processing(&self, id: MessageId) -> Result<bool> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.get_mut(&id) else {
            return Ok(false);
        };

        if !message.status.is_claimable() {
            return Ok(false);
        }

        message.status = InboxStatus::Processing;
        message.last_attempt_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_processed(&self, id: MessageId) -> Result<()> {
        self.transition(id, InboxStatus::Processing, InboxStatus::Processed, |m| {
            m.processed_at = Some(Utc::now());
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
        self.transition(id, InboxStatus::Processing, InboxStatus::Failed, |m| {
            m.retry_count += 1;
            m.last_attempt_at = Some(Utc::now());
            m.error_message = Some(error.to_string());
            m.stack_trace = stack_trace.map(str::to_string);
        })
        .await
    }

    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()> {
        self.transition(id, InboxStatus::Processing, InboxStatus::Discarded, |m| {
            m.error_message = Some(reason.to_string());
        })
        .await
    }

    async fn cleanup_old(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, m| {
            !((m.status.is_terminal() || m.status == InboxStatus::Failed)
                && m.received_at < cutoff)
        });
        Ok((before - messages.len()) as u64)
    }

    async fn count_by_status(&self, status: InboxStatus) -> Result<u64> {
        let messages = self.messages.read().await;
        Ok(messages.values().filter(|m| m.status == status).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ingest(store: &InMemoryInboxStore, message_id: &str) -> Option<InboxMessage> {
        store
            .try_add(
                message_id,
                "TestMessage",
                serde_json::json!({"n": 1}),
                "orders",
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn try_add_ingests_pending_row() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        assert_eq!(message.status, InboxStatus::Pending);
        assert_eq!(message.message_id, "abc-1");
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected_without_a_row() {
        let store = InMemoryInboxStore::new();

        assert!(ingest(&store, "abc-1").await.is_some());
        assert!(ingest(&store, "abc-1").await.is_none());
        assert_eq!(store.message_count().await, 1);

        // Different ID is unaffected.
        assert!(ingest(&store, "abc-2").await.is_some());
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn get_by_message_id_finds_external_key() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        let found = store.get_by_message_id("abc-1").await.unwrap().unwrap();
        assert_eq!(found.id, message.id);
        assert!(store.get_by_message_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        assert!(store.claim_processing(message.id).await.unwrap());
        assert!(!store.claim_processing(message.id).await.unwrap());
    }

    #[tokio::test]
    async fn mark_failed_increments_retry_count() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        store.claim_processing(message.id).await.unwrap();
        store
            .mark_failed(message.id, "handler blew up", None)
            .await
            .unwrap();

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("handler blew up"));
    }

    #[tokio::test]
    async fn mark_processed_from_wrong_state_is_rejected() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        let result = store.mark_processed(message.id).await;
        assert!(matches!(result, Err(InboxError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn failed_selection_respects_retry_bound() {
        let store = InMemoryInboxStore::new();
        let message = ingest(&store, "abc-1").await.unwrap();

        for _ in 0..3 {
            store.claim_processing(message.id).await.unwrap();
            store.mark_failed(message.id, "boom", None).await.unwrap();
        }

        assert!(store.get_failed(3).await.unwrap().is_empty());
        assert_eq!(store.get_failed(4).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_reclaims_expired_failed_rows() {
        let store = InMemoryInboxStore::new();

        // An old exhausted failure: reclaimed even though never processed.
        let mut old_failed = InboxMessage::new("old-1", "T", serde_json::json!({}), "s");
        old_failed.status = InboxStatus::Failed;
        old_failed.retry_count = 3;
        old_failed.received_at = Utc::now() - Duration::days(40);
        store.put(old_failed).await;

        let mut old_processed = InboxMessage::new("old-2", "T", serde_json::json!({}), "s");
        old_processed.status = InboxStatus::Processed;
        old_processed.received_at = Utc::now() - Duration::days(40);
        store.put(old_processed).await;

        ingest(&store, "fresh").await.unwrap();

        let removed = store.cleanup_old(Duration::days(30)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.message_count().await, 1);

        // Second pass is a no-op.
        assert_eq!(store.cleanup_old(Duration::days(30)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_batch_is_ordered_and_bounded() {
        let store = InMemoryInboxStore::new();
        let first = ingest(&store, "a").await.unwrap();
        let second = ingest(&store, "b").await.unwrap();
        ingest(&store, "c").await.unwrap();

        let pending = store.get_pending(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }
}
