//! Persistable snapshots of sagas and their steps.

use chrono::{DateTime, Utc};
use common::{SagaId, StepId};
use serde::{Deserialize, Serialize};

use crate::status::{SagaStatus, StepStatus};
use crate::step::SagaStep;

/// A serialized snapshot of a saga for persistence.
///
/// Actions are code, not data, so a record carries everything except the
/// step actions themselves. Recovery rebuilds the saga from its type's
/// step configuration and resumes from the recorded statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub name: String,
    pub status: SagaStatus,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
}

impl SagaRecord {
    /// Returns the time of the last recorded activity.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_updated_at.unwrap_or(self.created_at)
    }
}

/// A serialized snapshot of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl StepRecord {
    pub(crate) fn from_step<D: Send + Sync>(step: &SagaStep<D>) -> Self {
        Self {
            id: step.id(),
            name: step.name().to_string(),
            status: step.status(),
            created_at: step.created_at(),
            started_at: step.started_at(),
            completed_at: step.completed_at(),
            compensated_at: step.compensated_at(),
            error_message: step.error_message().map(str::to_string),
        }
    }
}
