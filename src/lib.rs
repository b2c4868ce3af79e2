//! taskgate — credential-scoped task queue.
//!
//! Accepts asynchronous automation requests, buffers them in an unbounded
//! FIFO, and dispatches them across a pool of configured credentials under
//! per-credential and global concurrency bounds. Each task moves through
//! `Pending → Processing → Completed | Failed`; transitions are recorded in
//! an in-memory registry and broadcast to per-task subscribers.
//!
//! The automation work itself is external: callers supply an
//! [`Executor`](worker::Executor) and get opaque result blobs back.

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod gate;
pub mod queue;
pub mod service;
pub mod task;
pub mod worker;

pub use config::QueueConfig;
pub use credential::{Credential, SelectionMode};
pub use error::{Error, Result};
pub use events::{EventStream, TaskEvent};
pub use service::{CredentialStats, QueueCounters, QueueStats, TaskQueue};
pub use task::record::{TaskRecord, TaskState};
pub use task::{Task, TaskPayload};
pub use worker::{ExecutionError, Executor};
