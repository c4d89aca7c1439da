//! Saga steps and their actions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AdapterError, StepId};

use crate::status::StepStatus;
use crate::{Result, SagaError};

/// The forward action and optional compensation of one saga step.
///
/// Both methods receive the saga's mutable data so earlier steps can leave
/// results (reservation IDs, payment references) for later steps and for
/// their own compensation. The default compensation is a no-op; a step
/// without one is trivially marked `Compensated` during rollback.
#[async_trait]
pub trait StepAction<D: Send + Sync>: Send + Sync {
    /// Runs the step's forward action.
    async fn execute(&self, data: &mut D) -> std::result::Result<(), AdapterError>;

    /// Undoes the forward action during rollback.
    async fn compensate(&self, _data: &mut D) -> std::result::Result<(), AdapterError> {
        Ok(())
    }
}

/// A named unit of work within a saga.
///
/// Created when added to a saga and mutated only by its own
/// [`execute`]/[`compensate`] calls. A step lives and dies with its owning
/// saga.
///
/// [`execute`]: SagaStep::execute
/// [`compensate`]: SagaStep::compensate
pub struct SagaStep<D> {
    id: StepId,
    name: String,
    status: StepStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    compensated_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    action: Arc<dyn StepAction<D>>,
}

impl<D: Send + Sync> SagaStep<D> {
    /// Creates a new step in the `NotStarted` state.
    pub fn new(name: impl Into<String>, action: Arc<dyn StepAction<D>>) -> Self {
        Self {
            id: StepId::new(),
            name: name.into(),
            status: StepStatus::NotStarted,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            compensated_at: None,
            error_message: None,
            action,
        }
    }

    /// Returns the step's unique ID.
    pub fn id(&self) -> StepId {
        self.id
    }

    /// Returns the step's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step's current status.
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Returns when the step was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the forward action started, if it has.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the forward action completed, if it did.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns when compensation finished, if it ran.
    pub fn compensated_at(&self) -> Option<DateTime<Utc>> {
        self.compensated_at
    }

    /// Returns the recorded error, if the step or its compensation failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Runs the forward action.
    ///
    /// Marks the step `Running`, invokes the action, and records the
    /// outcome: `Completed` on success, `Failed` with the error message on
    /// failure. The failure is returned as [`SagaError::StepFailed`].
    pub async fn execute(&mut self, data: &mut D) -> Result<()> {
        if !self.status.can_execute() {
            return Err(SagaError::InvalidStepState {
                step: self.name.clone(),
                actual: self.status,
            });
        }

        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());

        match self.action.execute(data).await {
            Ok(()) => {
                self.status = StepStatus::Completed;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                self.status = StepStatus::Failed;
                self.error_message = Some(e.to_string());
                Err(SagaError::StepFailed {
                    step: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Runs the compensation action.
    ///
    /// Only `Completed` steps are eligible. Marks the step `Compensating`,
    /// invokes the action, and records `Compensated` on success or
    /// `CompensationFailed` with the error message on failure. The adapter
    /// error is handed back so the caller can log it; rollback of the
    /// remaining steps continues regardless.
    pub async fn compensate(&mut self, data: &mut D) -> std::result::Result<(), AdapterError> {
        if !self.status.can_compensate() {
            return Ok(());
        }

        self.status = StepStatus::Compensating;

        match self.action.compensate(data).await {
            Ok(()) => {
                self.status = StepStatus::Compensated;
                self.compensated_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                self.status = StepStatus::CompensationFailed;
                self.error_message = Some(e.to_string());
                Err(e)
            }
        }
    }
}
