//! Handler adapter trait and registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AdapterError;

use crate::message::InboxMessage;

/// Consumer adapter that processes inbox messages of matching types.
///
/// The payload is passed through as stored; handlers deserialize it into
/// whatever shape they expect. Multiple handlers may be registered; the
/// first one whose [`can_handle`] returns true for a message type is used.
///
/// [`can_handle`]: MessageHandler::can_handle
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns true if this handler processes the given message type.
    fn can_handle(&self, message_type: &str) -> bool;

    /// Processes the message. Failures are absorbed by the processor and
    /// recorded on the message row.
    async fn handle(&self, message: &InboxMessage) -> std::result::Result<(), AdapterError>;
}

/// Ordered registry of handler adapters.
///
/// Resolution is first-match in registration order, memoized per message
/// type after the first hit.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn MessageHandler>>,
    resolved: RwLock<HashMap<String, usize>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Registration order decides precedence when
    /// more than one handler accepts a message type.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.push(handler);
        self.resolved.write().expect("registry lock poisoned").clear();
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolves the handler for a message type, first match wins.
    pub fn resolve(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        if let Some(&index) = self
            .resolved
            .read()
            .expect("registry lock poisoned")
            .get(message_type)
        {
            return Some(Arc::clone(&self.handlers[index]));
        }

        let index = self
            .handlers
            .iter()
            .position(|h| h.can_handle(message_type))?;
        self.resolved
            .write()
            .expect("registry lock poisoned")
            .insert(message_type.to_string(), index);
        Some(Arc::clone(&self.handlers[index]))
    }
}

#[derive(Debug, Default)]
struct InMemoryHandlerState {
    handled: Vec<InboxMessage>,
    fail_on_handle: bool,
}

/// In-memory handler for testing.
///
/// Accepts exactly one message type and records every message it receives.
#[derive(Clone)]
pub struct InMemoryHandler {
    message_type: String,
    state: Arc<RwLock<InMemoryHandlerState>>,
}

impl InMemoryHandler {
    /// Creates a handler that accepts the given message type.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            state: Arc::new(RwLock::new(InMemoryHandlerState::default())),
        }
    }

    /// Configures the handler to fail on subsequent handle calls.
    pub fn set_fail_on_handle(&self, fail: bool) {
        self.state.write().unwrap().fail_on_handle = fail;
    }

    /// Returns the number of messages successfully handled.
    pub fn handled_count(&self) -> usize {
        self.state.read().unwrap().handled.len()
    }

    /// Returns the external message IDs handled so far, in order.
    pub fn handled_message_ids(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .handled
            .iter()
            .map(|m| m.message_id.clone())
            .collect()
    }
}

#[async_trait]
impl MessageHandler for InMemoryHandler {
    fn can_handle(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    async fn handle(&self, message: &InboxMessage) -> std::result::Result<(), AdapterError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_handle {
            return Err(AdapterError::Other("handler failed".to_string()));
        }

        state.handled.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(message_type: &str) -> InboxMessage {
        InboxMessage::new("abc-1", message_type, serde_json::json!({}), "orders")
    }

    #[tokio::test]
    async fn test_handle_and_record() {
        let handler = InMemoryHandler::new("OrderPlaced");
        assert!(handler.can_handle("OrderPlaced"));
        assert!(!handler.can_handle("OrderCancelled"));

        handler.handle(&sample("OrderPlaced")).await.unwrap();
        assert_eq!(handler.handled_count(), 1);
        assert_eq!(handler.handled_message_ids(), vec!["abc-1"]);
    }

    #[tokio::test]
    async fn test_fail_on_handle() {
        let handler = InMemoryHandler::new("OrderPlaced");
        handler.set_fail_on_handle(true);

        let result = handler.handle(&sample("OrderPlaced")).await;
        assert!(result.is_err());
        assert_eq!(handler.handled_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_first_match_wins() {
        let first = Arc::new(InMemoryHandler::new("OrderPlaced"));
        let second = Arc::new(InMemoryHandler::new("OrderPlaced"));

        let mut registry = HandlerRegistry::new();
        registry.register(first.clone());
        registry.register(second.clone());
        assert_eq!(registry.len(), 2);

        let resolved = registry.resolve("OrderPlaced").unwrap();
        resolved.handle(&sample("OrderPlaced")).await.unwrap();

        assert_eq!(first.handled_count(), 1);
        assert_eq!(second.handled_count(), 0);
    }

    #[test]
    fn test_registry_no_match() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(InMemoryHandler::new("OrderPlaced")));

        assert!(registry.resolve("UnknownType").is_none());
    }
}
