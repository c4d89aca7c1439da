//! Saga orchestration with compensating transactions.
//!
//! A [`Saga`] is an ordered list of [`SagaStep`]s, each carrying a forward
//! action and an optional compensation. The [`SagaOrchestrator`] executes
//! steps strictly sequentially; when one fails, every previously completed
//! step is compensated in reverse order (best effort), then the original
//! error is returned to the caller.

mod error;
mod orchestrator;
mod postgres;
mod record;
mod repository;
mod saga;
mod status;
mod step;

pub use error::{Result, SagaError};
pub use orchestrator::{NoHooks, SagaHooks, SagaOrchestrator};
pub use postgres::PostgresSagaRepository;
pub use record::{SagaRecord, StepRecord};
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use saga::Saga;
pub use status::{SagaStatus, StepStatus};
pub use step::{SagaStep, StepAction};
