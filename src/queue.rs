//! Dispatch queue — unbounded FIFO intake buffer.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::task::Task;

/// Unbounded FIFO decoupling submission from execution.
///
/// `enqueue` never blocks; backpressure, if needed, belongs at submission
/// time outside this core. Workers share one receiver behind a mutex, so
/// dequeues hand out tasks in exactly the order they were enqueued,
/// whichever worker wins the lock.
pub struct DispatchQueue {
    /// Dropped on close; must not sit behind the receiver lock, because an
    /// idle worker parks inside `recv` while holding that lock.
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Task>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
    size: AtomicUsize,
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            size: AtomicUsize::new(0),
        }
    }

    /// Append a task. Returns `false` only after [`close`](Self::close).
    pub fn enqueue(&self, task: Task) -> bool {
        let tx = self.tx.lock().expect("queue sender lock poisoned");
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        if tx.send(task).is_err() {
            return false;
        }
        self.size.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Take the next task, suspending while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Task> {
        let task = self.rx.lock().await.recv().await?;
        self.size.fetch_sub(1, Ordering::Relaxed);
        Some(task)
    }

    /// Stop accepting new tasks by dropping the sender. A worker parked in
    /// [`dequeue`](Self::dequeue) wakes with `None` once the backlog is
    /// drained; this never waits on the receiver lock.
    pub fn close(&self) {
        self.tx.lock().expect("queue sender lock poisoned").take();
    }

    /// Tasks currently buffered.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
