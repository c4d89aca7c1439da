//! Polling processor that drives outbox messages through their lifecycle.

use std::sync::Arc;

use common::{ErrorClass, ProcessorConfig};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::message::OutboxMessage;
use crate::publisher::PublisherRegistry;
use crate::store::OutboxStore;

/// What happened to a single message during one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Successfully handed to a publisher.
    Published,

    /// No publisher accepted the destination; the message is terminal.
    Discarded,

    /// The publish attempt failed; the message is eligible for retry.
    Failed,

    /// The row could not be claimed (already owned or no longer due).
    Skipped,
}

/// Drives outbox messages from `Pending`/`Scheduled` to a terminal state.
///
/// The processor holds no state between invocations; every pass re-reads
/// the store, so any number of passes (or a restart mid-pass) only ever
/// re-attempts messages that are still eligible. It is designed to be
/// driven by a periodic timer, one single-threaded pass per tick.
pub struct OutboxProcessor<S: OutboxStore> {
    store: S,
    publishers: Arc<PublisherRegistry>,
    config: ProcessorConfig,
}

impl<S: OutboxStore> OutboxProcessor<S> {
    /// Creates a new processor over the given store and publisher registry.
    pub fn new(store: S, publishers: Arc<PublisherRegistry>, config: ProcessorConfig) -> Self {
        Self {
            store,
            publishers,
            config,
        }
    }

    /// Fetches one batch of ready messages and processes each in order.
    ///
    /// A publish failure on one message never aborts the batch; store
    /// errors do. Cancellation is honored between messages, never
    /// mid-message. Returns the number of messages processed.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn process_pending(&self, cancel: &CancellationToken) -> Result<usize> {
        let start = std::time::Instant::now();
        let batch = self
            .store
            .get_ready_to_publish(self.config.batch_size)
            .await?;

        let mut processed = 0;
        for message in &batch {
            if cancel.is_cancelled() {
                tracing::info!(processed, remaining = batch.len() - processed, "cancelled between messages");
                break;
            }
            self.process_message(message).await?;
            processed += 1;
        }

        metrics::histogram!("outbox_batch_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        if processed > 0 {
            tracing::debug!(processed, "outbox pass complete");
        }
        Ok(processed)
    }

    /// Processes a single message: claim, resolve a publisher, publish,
    /// and record the outcome on the row.
    #[tracing::instrument(skip(self, message), fields(message_id = %message.id, destination = %message.destination))]
    pub async fn process_message(&self, message: &OutboxMessage) -> Result<ProcessOutcome> {
        if !self.store.claim_publishing(message.id).await? {
            tracing::debug!("claim lost, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let Some(publisher) = self.publishers.resolve(&message.destination) else {
            let reason = format!(
                "No publisher found for destination: {}",
                message.destination
            );
            self.store.mark_discarded(message.id, &reason).await?;
            metrics::counter!("outbox_messages_discarded").increment(1);
            tracing::warn!(class = %ErrorClass::NoRoute, %reason, "message discarded");
            return Ok(ProcessOutcome::Discarded);
        };

        match publisher.publish(message).await {
            Ok(()) => {
                self.store.mark_published(message.id).await?;
                metrics::counter!("outbox_messages_published").increment(1);
                tracing::debug!("message published");
                Ok(ProcessOutcome::Published)
            }
            Err(e) => {
                self.store
                    .mark_failed(message.id, &e.to_string(), None)
                    .await?;
                metrics::counter!("outbox_messages_failed").increment(1);
                tracing::warn!(class = %e.class(), error = %e, "publish failed");
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    /// Re-runs the publishing path for `Failed` messages that have not
    /// exhausted their retries. Retry reuses [`process_message`]; there is
    /// no separate code path.
    ///
    /// [`process_message`]: OutboxProcessor::process_message
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
            tracing::info!(retried, "retried failed outbox messages");
        }
        Ok(retried)
    }

    /// Deletes terminal messages past the retention period.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.store.cleanup_old(self.config.retention).await?;
        if removed > 0 {
            metrics::counter!("outbox_messages_cleaned").increment(removed);
            tracing::info!(removed, "cleaned up expired outbox messages");
        }
        Ok(removed)
    }
}
