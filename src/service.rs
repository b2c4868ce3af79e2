//! Task queue facade — the surface the service layer talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::QueueConfig;
use crate::credential::{Credential, CredentialRegistry, CredentialSelector, SelectionMode};
use crate::error::{ConfigError, Result, TaskError};
use crate::events::{EventBus, EventStream, TaskEvent};
use crate::gate::ConcurrencyGate;
use crate::queue::DispatchQueue;
use crate::task::registry::TaskRegistry;
use crate::task::{Task, TaskPayload, TaskRecord};
use crate::worker::{self, Executor, PoolCounters, WorkerDeps};
use uuid::Uuid;

/// Queue-side statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueCounters {
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    /// Tasks currently buffered in the dispatch queue.
    pub size: usize,
    pub worker_count: usize,
    pub running: bool,
}

/// Credential-side statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub mode: SelectionMode,
    pub usage_count: HashMap<String, u64>,
    pub active_tasks: HashMap<String, u32>,
}

/// Combined statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue: QueueCounters,
    pub credentials: CredentialStats,
}

/// Credential-scoped task queue.
///
/// Owns the dispatch queue, task registry, credential registry, gate and
/// event bus, and runs the worker pool. Construction validates the
/// configuration; [`start`](Self::start) spawns the workers.
pub struct TaskQueue {
    config: QueueConfig,
    credentials: Arc<CredentialRegistry>,
    selector: Arc<CredentialSelector>,
    gate: Arc<ConcurrencyGate>,
    tasks: Arc<TaskRegistry>,
    queue: Arc<DispatchQueue>,
    bus: Arc<EventBus>,
    executor: Arc<dyn Executor>,
    counters: Arc<PoolCounters>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicUsize,
    running: AtomicBool,
}

impl TaskQueue {
    /// Build the queue. Fails if the credential list is empty or contains
    /// duplicate keys, or if the configuration names a zero bound.
    pub fn new(
        config: QueueConfig,
        credentials: Vec<Credential>,
        executor: Arc<dyn Executor>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let credentials = Arc::new(CredentialRegistry::new(credentials)?);
        let gate = Arc::new(ConcurrencyGate::new(
            Arc::clone(&credentials),
            config.max_concurrent_per_credential,
            config.max_total_concurrent,
        ));
        let selector = Arc::new(CredentialSelector::new(config.mode));
        let bus = Arc::new(EventBus::new(config.event_capacity));

        info!(
            credential_count = credentials.len(),
            mode = %config.mode,
            max_per_credential = config.max_concurrent_per_credential,
            max_total = config.max_total_concurrent,
            "task queue initialized"
        );

        Ok(Self {
            config,
            credentials,
            selector,
            gate,
            tasks: Arc::new(TaskRegistry::new()),
            queue: Arc::new(DispatchQueue::new()),
            bus,
            executor,
            counters: Arc::new(PoolCounters::default()),
            workers: tokio::sync::Mutex::new(Vec::new()),
            worker_count: AtomicUsize::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the worker pool. Idempotent; the default topology is one
    /// worker per credential.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }

        let count = self.config.worker_count.unwrap_or(self.credentials.len());
        let deps = WorkerDeps {
            queue: Arc::clone(&self.queue),
            tasks: Arc::clone(&self.tasks),
            credentials: Arc::clone(&self.credentials),
            selector: Arc::clone(&self.selector),
            gate: Arc::clone(&self.gate),
            bus: Arc::clone(&self.bus),
            executor: Arc::clone(&self.executor),
            counters: Arc::clone(&self.counters),
        };

        workers.extend(worker::spawn_workers(deps, count));
        self.worker_count.store(count, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
        info!(worker_count = count, "workers started");
    }

    /// Graceful shutdown: stop accepting submissions, let the workers drain
    /// the backlog, then wait for them to exit.
    pub async fn shutdown(&self) {
        info!("shutting down task queue");
        self.running.store(false, Ordering::Relaxed);
        self.queue.close();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            // A worker that panicked already tore its loop down; nothing
            // useful to do with the error here beyond not propagating it.
            let _ = handle.await;
        }
        self.worker_count.store(0, Ordering::Relaxed);
        info!("workers stopped");
    }

    /// Enqueue a new task. Returns its id immediately; the queue is
    /// unbounded, so this never waits for capacity.
    pub async fn submit(&self, payload: TaskPayload) -> Result<Uuid> {
        let task = Task::new(payload);
        let task_id = task.id;

        self.tasks.insert(TaskRecord::new(task_id)).await;
        if !self.queue.enqueue(task) {
            // Shut down between insert and enqueue; drop the orphan record.
            self.tasks.remove(task_id).await;
            return Err(TaskError::QueueClosed.into());
        }

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        info!(
            task_id = %task_id,
            queue_size = self.queue.len(),
            "task submitted"
        );
        Ok(task_id)
    }

    /// Snapshot of a task's record.
    pub async fn get_status(&self, task_id: Uuid) -> Result<TaskRecord> {
        Ok(self.tasks.get(task_id).await?)
    }

    /// Wait until the task reaches a terminal state or `timeout` elapses.
    ///
    /// A timeout abandons the wait only: the task keeps running and its
    /// record stays observable through [`get_status`](Self::get_status).
    pub async fn wait_for_result(&self, task_id: Uuid, timeout: Duration) -> Result<TaskRecord> {
        let mut stream = self.subscribe(task_id).await?;

        // Elapsed or not, the registry is authoritative for the outcome;
        // workers update it before publishing the terminal event.
        let _ = tokio::time::timeout(timeout, async {
            while let Some(event) = stream.next().await {
                if event.is_terminal() {
                    break;
                }
            }
        })
        .await;

        let record = self.tasks.get(task_id).await?;
        if record.is_terminal() {
            Ok(record)
        } else {
            Err(TaskError::TimedOut { id: task_id, timeout }.into())
        }
    }

    /// Subscribe to lifecycle events for a task.
    ///
    /// Unknown ids are an error. A task that already finished yields a
    /// one-event stream synthesized from its record.
    pub async fn subscribe(&self, task_id: Uuid) -> Result<EventStream> {
        let record = self.tasks.get(task_id).await?;
        if let Some(event) = TaskEvent::from_terminal_record(&record) {
            return Ok(EventStream::terminal(event));
        }

        // Live path. Re-check after taking the receiver: the task may have
        // finished (and its channel been retired) in that window, in which
        // case the receiver would never fire.
        let rx = self.bus.subscribe(task_id);
        let record = self.tasks.get(task_id).await?;
        if let Some(event) = TaskEvent::from_terminal_record(&record) {
            self.bus.retire(task_id);
            return Ok(EventStream::terminal(event));
        }

        Ok(EventStream::live(rx).with_registry(Arc::clone(&self.tasks), task_id))
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> QueueStats {
        use std::sync::atomic::Ordering::Relaxed;

        let snapshot = self.credentials.snapshot();
        QueueStats {
            queue: QueueCounters {
                enqueued: self.counters.enqueued.load(Relaxed),
                processed: self.counters.processed.load(Relaxed),
                failed: self.counters.failed.load(Relaxed),
                size: self.queue.len(),
                worker_count: self.worker_count.load(Relaxed),
                running: self.running.load(Relaxed),
            },
            credentials: CredentialStats {
                mode: self.selector.mode(),
                usage_count: snapshot.iter().map(|s| (s.key.clone(), s.usage_count)).collect(),
                active_tasks: snapshot.into_iter().map(|s| (s.key, s.active_tasks)).collect(),
            },
        }
    }

    /// Whether the worker pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// The task registry, for external retention policies.
    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }
}
