//! Transactional outbox: store, publisher adapters, and polling processor.
//!
//! Outbound messages are written to the store alongside the business change
//! that produced them, then published asynchronously by the
//! [`OutboxProcessor`]. Delivery is at-least-once; consumers are expected to
//! deduplicate (see the `inbox` crate).

mod error;
mod memory;
mod message;
mod postgres;
mod processor;
mod publisher;
mod store;

pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxStore;
pub use message::{OutboxMessage, OutboxStatus};
pub use postgres::PostgresOutboxStore;
pub use processor::{OutboxProcessor, ProcessOutcome};
pub use publisher::{InMemoryPublisher, Publisher, PublisherRegistry};
pub use store::OutboxStore;
