//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Compensated
/// NotStarted | Running ──► Failed   (explicit failure report)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has not started yet.
    #[default]
    NotStarted,

    /// Saga steps are being executed.
    Running,

    /// A step failed and compensating transactions are in progress.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Compensation finished after a step failure (terminal state).
    Compensated,

    /// Explicitly reported as failed (terminal state).
    Failed,
}

impl SagaStatus {
    /// Returns true if the saga can begin running.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::NotStarted)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if the saga can be explicitly failed.
    pub fn can_fail(&self) -> bool {
        matches!(self, SagaStatus::NotStarted | SagaStatus::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Failed => "Failed",
        }
    }

    /// Parses a status from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotStarted" => Some(SagaStatus::NotStarted),
            "Running" => Some(SagaStatus::Running),
            "Compensating" => Some(SagaStatus::Compensating),
            "Completed" => Some(SagaStatus::Completed),
            "Compensated" => Some(SagaStatus::Compensated),
            "Failed" => Some(SagaStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a single step within a saga.
///
/// Forward path: `NotStarted → Running → Completed | Failed`.
/// Rollback path: `Completed → Compensating → Compensated |
/// CompensationFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    /// Step has not run yet.
    #[default]
    NotStarted,

    /// The forward action is running.
    Running,

    /// The forward action succeeded.
    Completed,

    /// The forward action failed.
    Failed,

    /// The compensation action is running.
    Compensating,

    /// The compensation action succeeded (or there was none).
    Compensated,

    /// The compensation action itself failed.
    CompensationFailed,
}

impl StepStatus {
    /// Returns true if the forward action may run.
    pub fn can_execute(&self) -> bool {
        matches!(self, StepStatus::NotStarted)
    }

    /// Returns true if this step is eligible for compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "NotStarted",
            StepStatus::Running => "Running",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Compensating => "Compensating",
            StepStatus::Compensated => "Compensated",
            StepStatus::CompensationFailed => "CompensationFailed",
        }
    }

    /// Parses a status from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotStarted" => Some(StepStatus::NotStarted),
            "Running" => Some(StepStatus::Running),
            "Completed" => Some(StepStatus::Completed),
            "Failed" => Some(StepStatus::Failed),
            "Compensating" => Some(StepStatus::Compensating),
            "Compensated" => Some(StepStatus::Compensated),
            "CompensationFailed" => Some(StepStatus::CompensationFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_saga_status_is_not_started() {
        assert_eq!(SagaStatus::default(), SagaStatus::NotStarted);
    }

    #[test]
    fn test_can_start() {
        assert!(SagaStatus::NotStarted.can_start());
        assert!(!SagaStatus::Running.can_start());
        assert!(!SagaStatus::Compensating.can_start());
        assert!(!SagaStatus::Completed.can_start());
        assert!(!SagaStatus::Compensated.can_start());
        assert!(!SagaStatus::Failed.can_start());
    }

    #[test]
    fn test_can_compensate() {
        assert!(SagaStatus::Running.can_compensate());
        assert!(!SagaStatus::NotStarted.can_compensate());
        assert!(!SagaStatus::Compensating.can_compensate());
        assert!(!SagaStatus::Compensated.can_compensate());
    }

    #[test]
    fn test_can_fail() {
        assert!(SagaStatus::NotStarted.can_fail());
        assert!(SagaStatus::Running.can_fail());
        assert!(!SagaStatus::Compensating.can_fail());
        assert!(!SagaStatus::Completed.can_fail());
        assert!(!SagaStatus::Compensated.can_fail());
        assert!(!SagaStatus::Failed.can_fail());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaStatus::NotStarted.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
    }

    #[test]
    fn test_saga_status_round_trip() {
        for status in [
            SagaStatus::NotStarted,
            SagaStatus::Running,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Compensated,
            SagaStatus::Failed,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SagaStatus::parse("Bogus"), None);
    }

    #[test]
    fn test_step_execute_and_compensate_gates() {
        assert!(StepStatus::NotStarted.can_execute());
        assert!(!StepStatus::Completed.can_execute());

        assert!(StepStatus::Completed.can_compensate());
        assert!(!StepStatus::NotStarted.can_compensate());
        assert!(!StepStatus::Failed.can_compensate());
        assert!(!StepStatus::Compensated.can_compensate());
        assert!(!StepStatus::CompensationFailed.can_compensate());
    }

    #[test]
    fn test_step_status_round_trip() {
        for status in [
            StepStatus::NotStarted,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Compensating,
            StepStatus::Compensated,
            StepStatus::CompensationFailed,
        ] {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StepStatus::parse("Bogus"), None);
    }
}
