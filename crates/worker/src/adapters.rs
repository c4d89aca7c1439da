//! Stand-in delivery adapters.
//!
//! These accept every destination and message type and log the delivery.
//! Deployments replace them with real transport adapters registered in
//! `main`.

use async_trait::async_trait;
use common::AdapterError;
use inbox::{InboxMessage, MessageHandler};
use outbox::{OutboxMessage, Publisher};

/// Publisher that logs outbound messages instead of sending them.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn can_publish(&self, _destination: &str) -> bool {
        true
    }

    async fn publish(&self, message: &OutboxMessage) -> Result<(), AdapterError> {
        tracing::info!(
            message_id = %message.id,
            message_type = %message.message_type,
            destination = %message.destination,
            "outbound message"
        );
        Ok(())
    }
}

/// Handler that logs inbound messages instead of dispatching them.
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    fn can_handle(&self, _message_type: &str) -> bool {
        true
    }

    async fn handle(&self, message: &InboxMessage) -> Result<(), AdapterError> {
        tracing::info!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            source = %message.source,
            "inbound message"
        );
        Ok(())
    }
}
