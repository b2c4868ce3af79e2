//! Task lifecycle state machine and record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, waiting in the dispatch queue.
    Pending,
    /// Dequeued by a worker and executing.
    Processing,
    /// Executor returned a result.
    Completed,
    /// Executor reported or raised an error.
    Failed,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal state. No transition leaves a terminal
    /// state; a caller wanting a retry resubmits a new task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle record for one task.
///
/// Exactly one record exists per task id. A record is mutated only by the
/// worker that owns the task at that moment, so the transition methods never
/// race with each other; the registry serializes concurrent readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub state: TaskState,
    /// Assigned credential; set exactly once, on `Pending → Processing`.
    pub credential: Option<String>,
    /// Success payload; set only on `Completed`, mutually exclusive with `error`.
    pub result: Option<serde_json::Value>,
    /// Failure description; set only on `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Fresh record in `Pending` state.
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            credential: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, target: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.task_id,
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    /// Mark the task as executing on `credential`.
    pub fn mark_processing(&mut self, credential: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskState::Processing)?;
        self.credential = Some(credential.into());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as dequeued but impossible to route. Enters
    /// `Processing` without assigning a credential so the failure can be
    /// recorded; the record never names an unconfigured key.
    pub fn mark_unroutable(&mut self) -> Result<(), TaskError> {
        self.transition(TaskState::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a successful outcome.
    pub fn mark_completed(&mut self, result: serde_json::Value) -> Result<(), TaskError> {
        self.transition(TaskState::Completed)?;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed outcome.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskState::Failed)?;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Whether the task has reached `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock execution duration in seconds, once both timestamps exist.
    pub fn processing_time(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        let micros = end.signed_duration_since(start).num_microseconds()?;
        Some(micros.max(0) as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Processing));
        assert!(TaskState::Processing.can_transition_to(TaskState::Completed));
        assert!(TaskState::Processing.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn terminal_states_absorb() {
        for terminal in [TaskState::Completed, TaskState::Failed] {
            assert!(terminal.is_terminal());
            for target in [
                TaskState::Pending,
                TaskState::Processing,
                TaskState::Completed,
                TaskState::Failed,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn record_lifecycle_success() {
        let mut rec = TaskRecord::new(Uuid::new_v4());
        assert_eq!(rec.state, TaskState::Pending);
        assert!(rec.credential.is_none());

        rec.mark_processing("acc1").unwrap();
        assert_eq!(rec.state, TaskState::Processing);
        assert_eq!(rec.credential.as_deref(), Some("acc1"));
        assert!(rec.started_at.is_some());

        rec.mark_completed(serde_json::json!({"text": "ok"})).unwrap();
        assert!(rec.is_terminal());
        assert!(rec.result.is_some());
        assert!(rec.error.is_none());
        assert!(rec.processing_time().is_some());
    }

    #[test]
    fn record_lifecycle_failure() {
        let mut rec = TaskRecord::new(Uuid::new_v4());
        rec.mark_processing("acc1").unwrap();
        rec.mark_failed("browser crashed").unwrap();
        assert_eq!(rec.state, TaskState::Failed);
        assert!(rec.result.is_none());
        assert_eq!(rec.error.as_deref(), Some("browser crashed"));
    }

    #[test]
    fn unroutable_record_fails_without_a_credential() {
        let mut rec = TaskRecord::new(Uuid::new_v4());
        rec.mark_unroutable().unwrap();
        assert_eq!(rec.state, TaskState::Processing);
        assert!(rec.credential.is_none());
        assert!(rec.started_at.is_some());

        rec.mark_failed("no such credential").unwrap();
        assert_eq!(rec.state, TaskState::Failed);
        assert!(rec.credential.is_none());
    }

    #[test]
    fn terminal_record_rejects_further_transitions() {
        let mut rec = TaskRecord::new(Uuid::new_v4());
        rec.mark_processing("acc1").unwrap();
        rec.mark_completed(serde_json::Value::Null).unwrap();

        let err = rec.mark_failed("too late").unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert!(rec.error.is_none());
    }

    #[test]
    fn state_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(TaskState::Completed.to_string(), "completed");
    }
}
