//! Orchestrator driving saga execution and compensation.

use async_trait::async_trait;
use serde::Serialize;

use crate::repository::SagaRepository;
use crate::saga::Saga;
use crate::{Result, SagaError};

/// Extension points invoked around a saga's lifecycle.
///
/// All hooks default to no-ops. `configure_steps` runs when the
/// orchestrator starts a saga, letting a saga type populate its steps
/// lazily instead of at construction time.
#[async_trait]
pub trait SagaHooks<D: Send + Sync>: Send + Sync {
    /// Called once at start, before any step executes.
    async fn configure_steps(&self, _saga: &mut Saga<D>) -> Result<()> {
        Ok(())
    }

    /// Called after the saga reaches `Completed`.
    async fn on_completed(&self, _saga: &Saga<D>) {}

    /// Called after the saga is explicitly failed.
    async fn on_failed(&self, _saga: &Saga<D>, _reason: &str) {}
}

/// A hook set with no behavior, for sagas configured up front.
pub struct NoHooks;

#[async_trait]
impl<D: Send + Sync> SagaHooks<D> for NoHooks {}

/// Drives sagas through their lifecycle and persists snapshots along the
/// way.
///
/// Steps execute strictly sequentially in registration order; later steps
/// depend on the side effects of earlier ones, so there is no intra-saga
/// parallelism. When a step fails, completed steps are compensated in
/// reverse order before the step's error is returned to the caller.
/// Compensation runs to completion once started.
pub struct SagaOrchestrator<R: SagaRepository> {
    repository: R,
}

impl<R: SagaRepository> SagaOrchestrator<R> {
    /// Creates a new orchestrator over the given repository.
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Executes a saga from `NotStarted` to a terminal state.
    ///
    /// Returns an error if the saga has already started, if a step fails
    /// (after compensation has run), or if persisting a snapshot fails.
    #[tracing::instrument(skip(self, saga, hooks), fields(saga_id = %saga.id(), saga_name = %saga.name()))]
    pub async fn run<D, H>(&self, saga: &mut Saga<D>, hooks: &H) -> Result<()>
    where
        D: Serialize + Send + Sync,
        H: SagaHooks<D>,
    {
        if !saga.status().can_start() {
            return Err(SagaError::AlreadyStarted);
        }

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        hooks.configure_steps(saga).await?;
        saga.begin()?;
        self.save(saga).await?;

        for index in 0..saga.steps().len() {
            tracing::info!(step = saga.steps()[index].name(), "saga step started");

            let result = {
                let (data, steps) = saga.parts_mut();
                steps[index].execute(data).await
            };
            self.save(saga).await?;

            if let Err(step_error) = result {
                tracing::warn!(
                    step = saga.steps()[index].name(),
                    error = %step_error,
                    "saga step failed, compensating"
                );
                self.compensate(saga).await?;
                metrics::counter!("saga_compensated").increment(1);
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                return Err(step_error);
            }
        }

        saga.mark_completed();
        self.save(saga).await?;
        hooks.on_completed(saga).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(duration, "saga completed");

        Ok(())
    }

    /// Explicitly reports a saga as failed.
    ///
    /// Valid from `NotStarted` or `Running`; this path is independent of
    /// the compensation flow.
    #[tracing::instrument(skip(self, saga, hooks), fields(saga_id = %saga.id()))]
    pub async fn fail<D, H>(&self, saga: &mut Saga<D>, reason: &str, hooks: &H) -> Result<()>
    where
        D: Serialize + Send + Sync,
        H: SagaHooks<D>,
    {
        saga.mark_failed()?;
        self.save(saga).await?;
        hooks.on_failed(saga, reason).await;

        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(reason, "saga failed");
        Ok(())
    }

    /// Compensates completed steps in reverse registration order.
    ///
    /// Best effort: a failing compensation is logged and its step marked
    /// `CompensationFailed`, but every remaining eligible step still gets
    /// its attempt. The saga ends `Compensated` either way; per-step
    /// statuses carry the distinction.
    async fn compensate<D>(&self, saga: &mut Saga<D>) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        saga.mark_compensating()?;
        self.save(saga).await?;

        for index in (0..saga.steps().len()).rev() {
            if !saga.steps()[index].status().can_compensate() {
                continue;
            }

            let result = {
                let (data, steps) = saga.parts_mut();
                steps[index].compensate(data).await
            };
            self.save(saga).await?;

            match result {
                Ok(()) => {
                    tracing::info!(step = saga.steps()[index].name(), "step compensated");
                }
                Err(e) => {
                    metrics::counter!("saga_compensation_step_failures").increment(1);
                    tracing::warn!(
                        step = saga.steps()[index].name(),
                        class = %e.class(),
                        error = %e,
                        "compensation step failed, continuing rollback"
                    );
                }
            }
        }

        saga.mark_compensated();
        self.save(saga).await
    }

    async fn save<D>(&self, saga: &Saga<D>) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        self.repository.save(&saga.to_record()?).await
    }
}
