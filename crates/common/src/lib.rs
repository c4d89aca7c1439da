//! Shared types for the reliable messaging core.
//!
//! This crate holds the identifier newtypes, the processor configuration,
//! and the adapter error taxonomy used by both the outbox and inbox
//! processing loops.

mod adapter;
mod config;
mod types;

pub use adapter::{AdapterError, ErrorClass};
pub use config::ProcessorConfig;
pub use types::{MessageId, SagaId, StepId};
