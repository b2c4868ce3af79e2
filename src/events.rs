//! Lifecycle events and per-task fan-out.
//!
//! Workers publish a `processing` event when a task is dispatched and a
//! terminal event when it finishes. Subscribers get a finite stream: events
//! in publish order, ending after the terminal one. Fan-out is best-effort —
//! a slow subscriber may miss intermediate events (the registry stays
//! authoritative), and publishing never blocks the worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task::record::{TaskRecord, TaskState};

/// A lifecycle notification for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task accepted and waiting in the queue.
    Pending { task_id: Uuid, message: String },
    /// Task dispatched to a credential.
    Processing {
        task_id: Uuid,
        message: String,
        credential: String,
    },
    /// Task finished with a result.
    Completed {
        task_id: Uuid,
        message: String,
        result: serde_json::Value,
        /// Execution duration in seconds.
        processing_time: f64,
    },
    /// Task finished with an error.
    Failed {
        task_id: Uuid,
        message: String,
        error: String,
        processing_time: f64,
    },
}

impl TaskEvent {
    /// Get the task ID from any variant.
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Pending { task_id, .. }
            | Self::Processing { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => *task_id,
        }
    }

    /// Whether this is a terminal event (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// The status this event reports.
    pub fn state(&self) -> TaskState {
        match self {
            Self::Pending { .. } => TaskState::Pending,
            Self::Processing { .. } => TaskState::Processing,
            Self::Completed { .. } => TaskState::Completed,
            Self::Failed { .. } => TaskState::Failed,
        }
    }

    /// Synthesize the terminal event a finished record implies. Used when a
    /// subscriber arrives after the live terminal event was already
    /// broadcast; returns `None` for non-terminal records.
    pub fn from_terminal_record(record: &TaskRecord) -> Option<Self> {
        let processing_time = record.processing_time().unwrap_or(0.0);
        match record.state {
            TaskState::Completed => Some(Self::Completed {
                task_id: record.task_id,
                message: "Task completed".to_string(),
                result: record.result.clone().unwrap_or(serde_json::Value::Null),
                processing_time,
            }),
            TaskState::Failed => Some(Self::Failed {
                task_id: record.task_id,
                message: "Task failed".to_string(),
                error: record
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
                processing_time,
            }),
            _ => None,
        }
    }
}

/// Per-task subscriber registry.
///
/// Each task with at least one subscriber owns a broadcast channel; the
/// sender is dropped after its terminal event goes out, which lets live
/// receivers drain and end while keeping the map from growing without bound.
pub struct EventBus {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<TaskEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to future events for `task_id`. The caller is responsible
    /// for checking that the task exists; the service facade does.
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<TaskEvent> {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an event to current subscribers, if any. Never blocks; a
    /// terminal event retires the task's channel.
    pub fn publish(&self, event: TaskEvent) {
        let task_id = event.task_id();
        let terminal = event.is_terminal();

        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        if let Some(tx) = channels.get(&task_id) {
            // Send only fails when every receiver is gone; nothing to do then.
            let _ = tx.send(event);
        }
        if terminal {
            channels.remove(&task_id);
            debug!(task_id = %task_id, "event channel retired");
        }
    }

    /// Drop a task's channel. Used when a subscription recreated a channel
    /// for a task that had already finished; live receivers observe
    /// `Closed` and fall back to the registry.
    pub(crate) fn retire(&self, task_id: Uuid) {
        self.channels
            .lock()
            .expect("event bus lock poisoned")
            .remove(&task_id);
    }

    /// Number of tasks with an open channel.
    pub fn open_channels(&self) -> usize {
        self.channels.lock().expect("event bus lock poisoned").len()
    }
}

enum StreamState {
    /// Receiving live events until a terminal one arrives.
    Live(broadcast::Receiver<TaskEvent>),
    /// Single synthesized terminal event for an already-finished task.
    Terminal(Box<TaskEvent>),
    Done,
}

/// Finite sequence of lifecycle events for one task.
///
/// Yields events in publish order and ends after delivering a terminal
/// event. Not restartable — subscribe again (or read the registry) for the
/// final state.
pub struct EventStream {
    state: StreamState,
    /// Authoritative fallback: if the channel closes before a terminal
    /// event arrives, the final state is synthesized from the registry.
    registry: Option<(Arc<crate::task::registry::TaskRegistry>, Uuid)>,
}

impl EventStream {
    pub(crate) fn live(rx: broadcast::Receiver<TaskEvent>) -> Self {
        Self {
            state: StreamState::Live(rx),
            registry: None,
        }
    }

    pub(crate) fn terminal(event: TaskEvent) -> Self {
        Self {
            state: StreamState::Terminal(Box::new(event)),
            registry: None,
        }
    }

    pub(crate) fn with_registry(
        mut self,
        registry: Arc<crate::task::registry::TaskRegistry>,
        task_id: Uuid,
    ) -> Self {
        self.registry = Some((registry, task_id));
        self
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        loop {
            match std::mem::replace(&mut self.state, StreamState::Done) {
                StreamState::Live(mut rx) => match rx.recv().await {
                    Ok(event) => {
                        if !event.is_terminal() {
                            self.state = StreamState::Live(rx);
                        }
                        return Some(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Intermediate events are droppable; keep reading
                        // toward the terminal one.
                        warn!(missed, "event subscriber lagged");
                        self.state = StreamState::Live(rx);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Channel retired under us; the registry still
                        // knows how the task ended.
                        if let Some((registry, task_id)) = self.registry.take() {
                            if let Ok(record) = registry.get(task_id).await {
                                if let Some(event) = TaskEvent::from_terminal_record(&record) {
                                    return Some(event);
                                }
                            }
                        }
                        return None;
                    }
                },
                StreamState::Terminal(event) => return Some(*event),
                StreamState::Done => return None,
            }
        }
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl futures::Stream<Item = TaskEvent> {
        futures::stream::unfold(self, |mut s| async move {
            s.next().await.map(|event| (event, s))
        })
    }
}
