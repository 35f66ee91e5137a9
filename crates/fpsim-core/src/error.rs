//! Error types for the session core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Recoverable errors returned to the caller of a session request.
///
/// Invariant violations in the state machine are not represented here; they
/// panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Sensor id must be non-negative
    #[error("Invalid sensor id: {0}")]
    InvalidSensorId(i32),

    /// User id must be non-negative
    #[error("Invalid user id: {0}")]
    InvalidUserId(i32),

    /// The session has been closed and accepts no further operations
    #[error("Session is closed")]
    SessionClosed,

    /// The worker thread could not be started
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// The worker has been shut down
    #[error("Worker has stopped")]
    WorkerStopped,
}
