//! Idempotent inbox: store, handler adapters, and polling processor.
//!
//! Inbound messages are ingested through [`InboxStore::try_add`], which
//! rejects duplicates by their external message ID. That single check is
//! what turns at-least-once delivery from producers into effectively-once
//! processing on this side.

mod error;
mod handler;
mod memory;
mod message;
mod postgres;
mod processor;
mod store;

pub use error::{InboxError, Result};
pub use handler::{HandlerRegistry, InMemoryHandler, MessageHandler};
pub use memory::InMemoryInboxStore;
pub use message::{InboxMessage, InboxStatus};
pub use postgres::PostgresInboxStore;
pub use processor::{ConsumeOutcome, InboxProcessor};
pub use store::InboxStore;
