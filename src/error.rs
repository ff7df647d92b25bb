//! Error types shared by the Supermarket and Manager peers.
//!
//! Protocol errors (malformed frame, unknown prefix, out-of-range id) are
//! deliberately *not* represented here: they are logged and dropped at the
//! decode site, never propagated as an `Err`.

use thiserror::Error;

/// Errors that can terminate a Supermarket-side task.
#[derive(Debug, Error)]
pub enum SupermarketError {
    #[error("I/O error talking to the manager: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not connect to manager after {attempts} attempts")]
    ConnectRetriesExhausted { attempts: u32 },

    #[error("manager rejected the connection handshake")]
    HandshakeRejected,

    #[error("a background task panicked: {0}")]
    TaskPanicked(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can terminate a Manager-side task.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("I/O error talking to a supermarket peer: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection pool is full")]
    PoolFull,

    #[error("a background task panicked: {0}")]
    TaskPanicked(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading/validation failures. Any missing or non-positive
/// value that is explicitly present is an abort, not a silently-overridden
/// default.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },

    #[error("config key `{key}` must be a positive integer, got `{value}`")]
    NotPositive { key: String, value: String },

    #[error("config key `{key}` has invalid value `{value}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Result of a [`crate::queue::CloseableQueue`] dequeue attempt.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DequeueError {
    /// The queue was closed and will never yield another item.
    #[error("queue is closed")]
    Closed,
    /// The queue was empty at the time of a non-blocking dequeue.
    #[error("queue is empty")]
    Empty,
}
