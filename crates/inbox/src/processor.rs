//! Polling processor that drives inbox messages through their lifecycle.

use std::sync::Arc;

use common::{ErrorClass, ProcessorConfig};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::handler::HandlerRegistry;
use crate::message::InboxMessage;
use crate::store::InboxStore;

/// What happened to a single message during one consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Successfully handled.
    Processed,

    /// No handler accepted the message type; the message is terminal.
    Discarded,

    /// The handling attempt failed; the message is eligible for retry.
    Failed,

    /// The row could not be claimed (already owned by another worker).
    Skipped,
}

/// Drives inbox messages from `Pending` to a terminal state.
///
/// Holds no state between invocations and mirrors the outbox loop's error
/// policy: a handler failure on one message is absorbed and recorded on
/// that row, while a store error propagates and aborts the remaining
/// batch.
pub struct InboxProcessor<S: InboxStore> {
    store: S,
    handlers: Arc<HandlerRegistry>,
    config: ProcessorConfig,
}

impl<S: InboxStore> InboxProcessor<S> {
    /// Creates a new processor over the given store and handler registry.
    pub fn new(store: S, handlers: Arc<HandlerRegistry>, config: ProcessorConfig) -> Self {
        Self {
            store,
            handlers,
            config,
        }
    }

    /// Fetches one batch of pending messages and processes each in order.
    ///
    /// Cancellation is honored between messages, never mid-message.
    /// Returns the number of messages processed.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn process_pending(&self, cancel: &CancellationToken) -> Result<usize> {
        let start = std::time::Instant::now();
        let batch = self.store.get_pending(self.config.batch_size).await?;

        let mut processed = 0;
        for message in &batch {
            if cancel.is_cancelled() {
                tracing::info!(processed, remaining = batch.len() - processed, "cancelled between messages");
                break;
            }
            self.process_message(message).await?;
            processed += 1;
        }

        metrics::histogram!("inbox_batch_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        if processed > 0 {
            tracing::debug!(processed, "inbox pass complete");
        }
        Ok(processed)
    }

    /// Processes a single message: claim, resolve a handler, handle,
    /// and record the outcome on the row.
    #[tracing::instrument(skip(self, message), fields(message_id = %message.message_id, message_type = %message.message_type))]
    pub async fn process_message(&self, message: &InboxMessage) -> Result<ConsumeOutcome> {
        if !self.store.claim_processing(message.id).await? {
            tracing::debug!("claim lost, skipping");
            return Ok(ConsumeOutcome::Skipped);
        }

        let Some(handler) = self.handlers.resolve(&message.message_type) else {
            let reason = format!(
                "No handler found for message type: {}",
                message.message_type
            );
            self.store.mark_discarded(message.id, &reason).await?;
            metrics::counter!("inbox_messages_discarded").increment(1);
            tracing::warn!(class = %ErrorClass::NoRoute, %reason, "message discarded");
            return Ok(ConsumeOutcome::Discarded);
        };

        match handler.handle(message).await {
            Ok(()) => {
                self.store.mark_processed(message.id).await?;
                metrics::counter!("inbox_messages_processed").increment(1);
                tracing::debug!("message processed");
                Ok(ConsumeOutcome::Processed)
            }
            Err(e) => {
                self.store
                    .mark_failed(message.id, &e.to_string(), None)
                    .await?;
                metrics::counter!("inbox_messages_failed").increment(1);
                tracing::warn!(class = %e.class(), error = %e, "handling failed");
                Ok(ConsumeOutcome::Failed)
            }
        }
    }

    /// Re-runs the handling path for `Failed` messages that have not
    /// exhausted their retries.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn retry_failed(&self, cancel: &CancellationToken) -> Result<usize> {
        let failed = self.store.get_failed(self.config.max_retries).await?;

        let mut retried = 0;
        for message in &failed {
            if cancel.is_cancelled() {
                break;
            }
            self.process_message(message).await?;
            retried += 1;
        }

        if retried > 0 {
            tracing::info!(retried, "retried failed inbox messages");
        }
        Ok(retried)
    }

    /// Deletes expired messages past the retention period, including
    /// exhausted `Failed` rows.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.store.cleanup_old(self.config.retention).await?;
        if removed > 0 {
            metrics::counter!("inbox_messages_cleaned").increment(removed);
            tracing::info!(removed, "cleaned up expired inbox messages");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::InMemoryHandler;
    use crate::memory::InMemoryInboxStore;
    use crate::message::InboxStatus;

    fn setup(
        message_types: &[&str],
    ) -> (
        InboxProcessor<InMemoryInboxStore>,
        InMemoryInboxStore,
        Vec<InMemoryHandler>,
    ) {
        let store = InMemoryInboxStore::new();
        let mut registry = HandlerRegistry::new();
        let mut handlers = Vec::new();
        for message_type in message_types {
            let handler = InMemoryHandler::new(*message_type);
            registry.register(Arc::new(handler.clone()));
            handlers.push(handler);
        }

        let processor = InboxProcessor::new(
            store.clone(),
            Arc::new(registry),
            ProcessorConfig::default(),
        );
        (processor, store, handlers)
    }

    async fn ingest(
        store: &InMemoryInboxStore,
        message_id: &str,
        message_type: &str,
    ) -> InboxMessage {
        store
            .try_add(message_id, message_type, serde_json::json!({"n": 1}), "s")
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_message_is_processed() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        let message = ingest(&store, "abc-1", "OrderPlaced").await;

        let processed = processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed, 1);

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Processed);
        assert!(stored.processed_at.is_some());
        assert_eq!(handlers[0].handled_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ingestion_processes_once() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        ingest(&store, "abc-1", "OrderPlaced").await;

        // Redelivery from an at-least-once producer.
        let duplicate = store
            .try_add("abc-1", "OrderPlaced", serde_json::json!({"n": 1}), "s")
            .await
            .unwrap();
        assert!(duplicate.is_none());

        processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handlers[0].handled_count(), 1);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_handler_discards_with_reason() {
        let (processor, store, _) = setup(&["OrderPlaced"]);
        let message = ingest(&store, "abc-1", "UnknownType").await;

        let outcome = processor.process_message(&message).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Discarded);

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Discarded);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("No handler found for message type: UnknownType")
        );
    }

    #[tokio::test]
    async fn test_handler_failure_marks_failed() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        handlers[0].set_fail_on_handle(true);
        let message = ingest(&store, "abc-1", "OrderPlaced").await;

        processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("handler failed"));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let (processor, store, handlers) = setup(&["A", "B"]);
        handlers[0].set_fail_on_handle(true);

        ingest(&store, "m-1", "A").await;
        let ok = ingest(&store, "m-2", "B").await;

        let processed = processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed, 2);

        let stored = store.get(ok.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Processed);
        assert_eq!(handlers[1].handled_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_failed_message() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        handlers[0].set_fail_on_handle(true);
        let message = ingest(&store, "abc-1", "OrderPlaced").await;

        processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();
        handlers[0].set_fail_on_handle(false);

        let retried = processor
            .retry_failed(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(retried, 1);

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InboxStatus::Processed);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_drops_out_of_selection() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        handlers[0].set_fail_on_handle(true);
        let message = ingest(&store, "abc-1", "OrderPlaced").await;

        processor
            .process_pending(&CancellationToken::new())
            .await
            .unwrap();
        for _ in 0..2 {
            processor
                .retry_failed(&CancellationToken::new())
                .await
                .unwrap();
        }

        let stored = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(
            processor
                .retry_failed(&CancellationToken::new())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_messages() {
        let (processor, store, handlers) = setup(&["OrderPlaced"]);
        ingest(&store, "m-1", "OrderPlaced").await;
        ingest(&store, "m-2", "OrderPlaced").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let processed = processor.process_pending(&cancel).await.unwrap();
        assert_eq!(processed, 0);
        assert_eq!(handlers[0].handled_count(), 0);
    }

    #[tokio::test]
    async fn test_claimed_row_is_skipped() {
        let (processor, store, _) = setup(&["OrderPlaced"]);
        let message = ingest(&store, "abc-1", "OrderPlaced").await;

        store.claim_processing(message.id).await.unwrap();

        let outcome = processor.process_message(&message).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Skipped);
    }
}
