//! Error types for the fpsim daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] fpsim_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session requested for a sensor this daemon does not serve
    #[error("Unknown sensor id: {0}")]
    UnknownSensor(i32),

    /// A session is already open on the sensor
    #[error("A session is already open on sensor {0}")]
    SessionAlreadyOpen(i32),

    /// The connection has no open session
    #[error("No session is open on this connection")]
    NoSession,

    /// The session is still busy with an earlier operation
    #[error("Operation in flight: {0}")]
    OperationInFlight(fpsim_core::SessionState),

    /// Nothing is listening on the daemon socket
    #[error("Daemon not running at {0:?}")]
    DaemonNotRunning(std::path::PathBuf),

    /// Cancel handle not issued on this connection
    #[error("Unknown cancel handle: {0}")]
    UnknownCancelHandle(String),
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
