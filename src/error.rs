//! Error types for taskgate.

use std::time::Duration;

use uuid::Uuid;

use crate::task::record::TaskState;

/// Top-level error type for the queue core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),
}

/// Configuration-time errors. All of these are fatal: the queue refuses to
/// construct rather than start without capacity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No credentials configured; the queue has no capacity")]
    NoCredentials,

    #[error("Duplicate credential key: {key}")]
    DuplicateKey { key: String },

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Task lifecycle and lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {id} did not finish within {timeout:?}")]
    TimedOut { id: Uuid, timeout: Duration },

    #[error("Queue is shut down; submission rejected")]
    QueueClosed,
}

/// Concurrency gate errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Unknown credential key: {key}")]
    UnknownCredential { key: String },
}

/// Result type alias for the queue core.
pub type Result<T> = std::result::Result<T, Error>;
