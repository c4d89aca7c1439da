//! The saga aggregate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::Serialize;

use crate::record::{SagaRecord, StepRecord};
use crate::status::SagaStatus;
use crate::step::{SagaStep, StepAction};
use crate::{Result, SagaError};

/// An ordered, append-only sequence of steps with a shared data payload.
///
/// The saga exclusively owns its steps; registration order is both the
/// execution order and the reverse-compensation order. Steps can only be
/// added before the saga starts.
pub struct Saga<D> {
    id: SagaId,
    name: String,
    status: SagaStatus,
    data: D,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_updated_at: Option<DateTime<Utc>>,
    steps: Vec<SagaStep<D>>,
}

impl<D: Send + Sync> Saga<D> {
    /// Creates a new saga in the `NotStarted` state.
    pub fn new(name: impl Into<String>, data: D) -> Self {
        Self {
            id: SagaId::new(),
            name: name.into(),
            status: SagaStatus::NotStarted,
            data,
            created_at: Utc::now(),
            completed_at: None,
            last_updated_at: None,
            steps: Vec::new(),
        }
    }

    /// Returns the saga's unique ID.
    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Returns the saga's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the saga's current status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns a reference to the business data payload.
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Returns a mutable reference to the business data payload.
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Returns when the saga was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the saga reached a terminal state, if it has.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the time of the last status change, if any.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    /// Returns the saga's steps in registration order.
    pub fn steps(&self) -> &[SagaStep<D>] {
        &self.steps
    }

    /// Looks up a step by name.
    pub fn step(&self, name: &str) -> Option<&SagaStep<D>> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Appends a step. Only allowed before the saga starts.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        action: Arc<dyn StepAction<D>>,
    ) -> Result<()> {
        if !self.status.can_start() {
            return Err(SagaError::AlreadyStarted);
        }
        self.steps.push(SagaStep::new(name, action));
        Ok(())
    }

    /// Splits the saga into its data and steps for simultaneous mutation.
    pub(crate) fn parts_mut(&mut self) -> (&mut D, &mut [SagaStep<D>]) {
        (&mut self.data, &mut self.steps)
    }

    fn touch(&mut self) {
        self.last_updated_at = Some(Utc::now());
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        if !self.status.can_start() {
            return Err(SagaError::AlreadyStarted);
        }
        self.status = SagaStatus::Running;
        self.touch();
        Ok(())
    }

    pub(crate) fn mark_compensating(&mut self) -> Result<()> {
        if !self.status.can_compensate() {
            return Err(SagaError::InvalidState {
                expected: SagaStatus::Running.to_string(),
                actual: self.status,
            });
        }
        self.status = SagaStatus::Compensating;
        self.touch();
        Ok(())
    }

    pub(crate) fn mark_compensated(&mut self) {
        self.status = SagaStatus::Compensated;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = SagaStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub(crate) fn mark_failed(&mut self) -> Result<()> {
        if !self.status.can_fail() {
            return Err(SagaError::InvalidState {
                expected: "NotStarted or Running".to_string(),
                actual: self.status,
            });
        }
        self.status = SagaStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }
}

impl<D: Serialize + Send + Sync> Saga<D> {
    /// Produces a persistable snapshot of the saga and its steps.
    pub fn to_record(&self) -> Result<SagaRecord> {
        Ok(SagaRecord {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            data: serde_json::to_value(&self.data)?,
            created_at: self.created_at,
            completed_at: self.completed_at,
            last_updated_at: self.last_updated_at,
            steps: self.steps.iter().map(StepRecord::from_step).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::AdapterError;

    struct Noop;

    #[async_trait]
    impl StepAction<u32> for Noop {
        async fn execute(&self, data: &mut u32) -> std::result::Result<(), AdapterError> {
            *data += 1;
            Ok(())
        }
    }

    #[test]
    fn test_new_saga_is_not_started() {
        let saga = Saga::new("order-fulfillment", 0u32);
        assert_eq!(saga.status(), SagaStatus::NotStarted);
        assert!(saga.steps().is_empty());
        assert!(saga.completed_at().is_none());
    }

    #[test]
    fn test_add_step_preserves_order() {
        let mut saga = Saga::new("order-fulfillment", 0u32);
        saga.add_step("Reserve", Arc::new(Noop)).unwrap();
        saga.add_step("Charge", Arc::new(Noop)).unwrap();

        let names: Vec<_> = saga.steps().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["Reserve", "Charge"]);
        assert!(saga.step("Charge").is_some());
        assert!(saga.step("Ship").is_none());
    }

    #[test]
    fn test_add_step_after_start_is_rejected() {
        let mut saga = Saga::new("order-fulfillment", 0u32);
        saga.begin().unwrap();

        let result = saga.add_step("Reserve", Arc::new(Noop));
        assert!(matches!(result, Err(SagaError::AlreadyStarted)));
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut saga = Saga::new("order-fulfillment", 0u32);
        saga.begin().unwrap();
        assert!(matches!(saga.begin(), Err(SagaError::AlreadyStarted)));
    }

    #[test]
    fn test_mark_failed_from_terminal_is_rejected() {
        let mut saga = Saga::new("order-fulfillment", 0u32);
        saga.begin().unwrap();
        saga.mark_completed();

        assert!(matches!(
            saga.mark_failed(),
            Err(SagaError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_to_record_snapshots_state() {
        let mut saga = Saga::new("order-fulfillment", 7u32);
        saga.add_step("Reserve", Arc::new(Noop)).unwrap();

        let record = saga.to_record().unwrap();
        assert_eq!(record.id, saga.id());
        assert_eq!(record.name, "order-fulfillment");
        assert_eq!(record.status, SagaStatus::NotStarted);
        assert_eq!(record.data, serde_json::json!(7));
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].name, "Reserve");
    }
}
