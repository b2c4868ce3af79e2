//! Task types.
//!
//! - `record` — lifecycle state machine and per-task record
//! - `registry` — shared map of task id to record

pub mod record;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credential::SelectionMode;

pub use record::{TaskRecord, TaskState};
pub use registry::TaskRegistry;

/// Opaque request payload. The core never inspects `prompt` or `flags`;
/// they are handed verbatim to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// The request text.
    pub prompt: String,
    /// Arbitrary behavior flags for the executor.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub flags: serde_json::Value,
    /// Pin this task to a specific credential key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Override the configured selection mode for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SelectionMode>,
}

impl TaskPayload {
    /// Payload with just a prompt, no flags or overrides.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            flags: serde_json::Value::Null,
            credential: None,
            mode: None,
        }
    }

    /// Pin the task to one credential.
    pub fn with_credential(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(key.into());
        self
    }

    /// Override the selection mode for this task.
    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// One unit of submitted work. Immutable once created; travels through the
/// dispatch queue to whichever worker dequeues it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
        }
    }
}
