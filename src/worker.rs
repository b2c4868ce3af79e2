//! Worker pool — execution loops pulling from the dispatch queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::credential::{Credential, CredentialRegistry, CredentialSelector};
use crate::error::TaskError;
use crate::events::{EventBus, TaskEvent};
use crate::gate::ConcurrencyGate;
use crate::queue::DispatchQueue;
use crate::task::registry::TaskRegistry;
use crate::task::{Task, TaskPayload};

/// Failure reported by the external automation engine. Opaque to the core;
/// recorded verbatim on the task.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// External execution collaborator.
///
/// Invoked once per dispatched task with the opaque payload and the
/// assigned credential. May take arbitrarily long; the gate guarantees it
/// is never invoked beyond the configured concurrency bound per credential.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(
        &self,
        payload: &TaskPayload,
        credential: &Credential,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Shared counters for queue statistics.
#[derive(Debug, Default)]
pub struct PoolCounters {
    pub enqueued: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

/// Everything a worker loop needs, shared across the pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<DispatchQueue>,
    pub tasks: Arc<TaskRegistry>,
    pub credentials: Arc<CredentialRegistry>,
    pub selector: Arc<CredentialSelector>,
    pub gate: Arc<ConcurrencyGate>,
    pub bus: Arc<EventBus>,
    pub executor: Arc<dyn Executor>,
    pub counters: Arc<PoolCounters>,
}

/// Spawn `count` worker loops.
pub fn spawn_workers(deps: WorkerDeps, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let deps = deps.clone();
            tokio::spawn(worker_loop(worker_id, deps))
        })
        .collect()
}

/// One execution loop: dequeue, dispatch, record, repeat. Exits when the
/// queue is closed and drained.
async fn worker_loop(worker_id: usize, deps: WorkerDeps) {
    info!(worker_id, "worker started");

    while let Some(task) = deps.queue.dequeue().await {
        debug!(worker_id, task_id = %task.id, "worker picked up task");
        process_task(worker_id, &deps, task).await;
    }

    info!(worker_id, "worker stopped");
}

/// Drive one task from `Pending` to a terminal state.
///
/// A failing or panicking executor is contained here: the outcome lands on
/// this task's record and event stream, the gate permit is released by
/// drop, and the loop moves on to the next task.
async fn process_task(worker_id: usize, deps: &WorkerDeps, task: Task) {
    let task_id = task.id;

    // Resolve the credential: honor a pinned key, otherwise ask the selector.
    // An unconfigured pin fails the task without ever assigning the bogus
    // key to its record.
    let key = match &task.payload.credential {
        Some(pinned) => {
            if !deps.credentials.contains(pinned) {
                error!(worker_id, task_id = %task_id, credential = %pinned, "unknown pinned credential");
                let started = deps
                    .tasks
                    .update(task_id, |rec| rec.mark_unroutable())
                    .await
                    .and_then(|r| r);
                match started {
                    Ok(()) => fail_task(deps, task_id, format!("unknown credential key: {pinned}")).await,
                    Err(e) => warn!(worker_id, task_id = %task_id, error = %e, "cannot start task"),
                }
                return;
            }
            // Pinned dispatches count toward usage the same as selected ones.
            deps.credentials.record_use_by_key(pinned);
            pinned.clone()
        }
        None => deps.selector.select(&deps.credentials, task.payload.mode),
    };

    if let Err(e) = deps
        .tasks
        .update(task_id, |rec| rec.mark_processing(&key))
        .await
        .and_then(|r| r)
    {
        // The record is gone or already moved on; nothing to execute.
        warn!(worker_id, task_id = %task_id, error = %e, "cannot start task");
        return;
    }

    deps.bus.publish(TaskEvent::Processing {
        task_id,
        message: format!("Task processing on credential {key}"),
        credential: key.clone(),
    });

    // Admission happens after the record turns Processing: a saturated
    // credential makes the worker wait here, visibly mid-flight.
    let permit = match deps.gate.acquire(&key).await {
        Ok(permit) => permit,
        Err(e) => {
            fail_task(deps, task_id, e.to_string()).await;
            return;
        }
    };

    let outcome = run_executor(deps, &task, &key).await;
    drop(permit);

    match outcome {
        Ok(result) => {
            let recorded = deps
                .tasks
                .update(task_id, |rec| {
                    rec.mark_completed(result.clone())?;
                    Ok::<_, TaskError>(rec.processing_time().unwrap_or(0.0))
                })
                .await
                .and_then(|r| r);

            match recorded {
                Ok(processing_time) => {
                    info!(
                        worker_id,
                        task_id = %task_id,
                        credential = %key,
                        processing_time,
                        "task completed"
                    );
                    deps.counters.processed.fetch_add(1, Ordering::Relaxed);
                    deps.bus.publish(TaskEvent::Completed {
                        task_id,
                        message: "Task completed".to_string(),
                        result,
                        processing_time,
                    });
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "cannot record completion"),
            }
        }
        Err(message) => {
            error!(
                worker_id,
                task_id = %task_id,
                credential = %key,
                error = %message,
                "task failed"
            );
            fail_task(deps, task_id, message).await;
        }
    }
}

/// Run the executor in its own task so a panic inside the collaborator is
/// reported as this task's failure instead of killing the worker loop.
async fn run_executor(
    deps: &WorkerDeps,
    task: &Task,
    key: &str,
) -> Result<serde_json::Value, String> {
    let credential = deps
        .credentials
        .get(key)
        .cloned()
        .ok_or_else(|| format!("unknown credential key: {key}"))?;

    let executor = Arc::clone(&deps.executor);
    let payload = task.payload.clone();
    let handle = tokio::spawn(async move { executor.execute(&payload, &credential).await });

    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) => Err(format!("executor panicked: {join_err}")),
    }
}

/// Record a failure outcome on a `Processing` record and broadcast it.
async fn fail_task(deps: &WorkerDeps, task_id: uuid::Uuid, message: String) {
    let recorded = deps
        .tasks
        .update(task_id, |rec| {
            rec.mark_failed(&message)?;
            Ok::<_, TaskError>(rec.processing_time().unwrap_or(0.0))
        })
        .await
        .and_then(|r| r);

    match recorded {
        Ok(processing_time) => {
            deps.counters.failed.fetch_add(1, Ordering::Relaxed);
            deps.bus.publish(TaskEvent::Failed {
                task_id,
                message: "Task failed".to_string(),
                error: message,
                processing_time,
            });
        }
        Err(e) => warn!(task_id = %task_id, error = %e, "cannot record failure"),
    }
}
