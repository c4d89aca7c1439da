//! Publisher adapter trait and registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AdapterError;

use crate::message::OutboxMessage;

/// Transport adapter that delivers outbox messages to a destination.
///
/// Multiple publishers may be registered; the first one whose
/// [`can_publish`] returns true for a destination is used.
///
/// [`can_publish`]: Publisher::can_publish
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns true if this publisher handles the given destination.
    fn can_publish(&self, destination: &str) -> bool;

    /// Delivers the message. Failures are absorbed by the processor and
    /// recorded on the message row.
    async fn publish(&self, message: &OutboxMessage) -> std::result::Result<(), AdapterError>;
}

/// Ordered registry of publisher adapters.
///
/// Resolution is first-match in registration order. Resolved destinations
/// are memoized, so steady-state lookup is a single map hit rather than a
/// scan over every adapter.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: Vec<Arc<dyn Publisher>>,
    resolved: RwLock<HashMap<String, usize>>,
}

impl PublisherRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a publisher. Registration order decides precedence when
    /// more than one publisher accepts a destination.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.push(publisher);
        self.resolved.write().expect("registry lock poisoned").clear();
    }

    /// Returns the number of registered publishers.
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    /// Returns true if no publishers are registered.
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Resolves the publisher for a destination, first match wins.
    pub fn resolve(&self, destination: &str) -> Option<Arc<dyn Publisher>> {
        if let Some(&index) = self
            .resolved
            .read()
            .expect("registry lock poisoned")
            .get(destination)
        {
            return Some(Arc::clone(&self.publishers[index]));
        }

        let index = self
            .publishers
            .iter()
            .position(|p| p.can_publish(destination))?;
        self.resolved
            .write()
            .expect("registry lock poisoned")
            .insert(destination.to_string(), index);
        Some(Arc::clone(&self.publishers[index]))
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<OutboxMessage>,
    fail_on_publish: bool,
}

/// In-memory publisher for testing.
///
/// Accepts exactly one destination and records every message it receives.
#[derive(Clone)]
pub struct InMemoryPublisher {
    destination: String,
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a publisher that accepts the given destination.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            state: Arc::new(RwLock::new(InMemoryPublisherState::default())),
        }
    }

    /// Configures the publisher to fail on subsequent publish calls.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Returns the number of messages successfully published.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Returns the message types published so far, in order.
    pub fn published_types(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .published
            .iter()
            .map(|m| m.message_type.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    fn can_publish(&self, destination: &str) -> bool {
        self.destination == destination
    }

    async fn publish(&self, message: &OutboxMessage) -> std::result::Result<(), AdapterError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_publish {
            return Err(AdapterError::Other("publish failed".to_string()));
        }

        state.published.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(destination: &str) -> OutboxMessage {
        OutboxMessage::new("TestMessage", serde_json::json!({}), destination, None)
    }

    #[tokio::test]
    async fn test_publish_and_record() {
        let publisher = InMemoryPublisher::new("orders");
        assert!(publisher.can_publish("orders"));
        assert!(!publisher.can_publish("payments"));

        publisher.publish(&sample("orders")).await.unwrap();
        assert_eq!(publisher.published_count(), 1);
        assert_eq!(publisher.published_types(), vec!["TestMessage"]);
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let publisher = InMemoryPublisher::new("orders");
        publisher.set_fail_on_publish(true);

        let result = publisher.publish(&sample("orders")).await;
        assert!(result.is_err());
        assert_eq!(publisher.published_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_first_match_wins() {
        let first = Arc::new(InMemoryPublisher::new("orders"));
        let second = Arc::new(InMemoryPublisher::new("orders"));

        let mut registry = PublisherRegistry::new();
        registry.register(first.clone());
        registry.register(second.clone());
        assert_eq!(registry.len(), 2);

        let resolved = registry.resolve("orders").unwrap();
        resolved.publish(&sample("orders")).await.unwrap();

        assert_eq!(first.published_count(), 1);
        assert_eq!(second.published_count(), 0);
    }

    #[test]
    fn test_registry_no_match() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(InMemoryPublisher::new("orders")));

        assert!(registry.resolve("no-such-queue").is_none());
    }

    #[test]
    fn test_registry_memoizes_resolution() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(InMemoryPublisher::new("orders")));

        assert!(registry.resolve("orders").is_some());
        // Second resolution hits the cache; same adapter comes back.
        assert!(registry.resolve("orders").is_some());
        assert_eq!(
            registry.resolved.read().unwrap().get("orders").copied(),
            Some(0)
        );
    }
}
