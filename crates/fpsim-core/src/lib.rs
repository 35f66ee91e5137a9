//! fpsim Core - Session state machine for the simulated fingerprint sensor
//!
//! This crate provides the orchestration layer between a privileged client
//! and a sensor engine:
//! - A single-threaded FIFO worker that runs every operation body
//! - One-shot cancellation signals split into source and sink ends
//! - The session state machine that schedules, runs and idles operations
//! - Client-death monitoring that closes a session exactly once

pub mod callback;
pub mod cancellation;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod session;
pub mod types;
pub mod worker;

pub use callback::{ChannelCallback, SessionCallback, SessionEvent};
pub use cancellation::{CancellationHandle, SignalSink, SignalSource};
pub use engine::Engine;
pub use error::{CoreError, Result};
pub use monitor::ClientLinkMonitor;
pub use session::{Session, SingleFlight};
pub use types::{
    AcquiredInfo, ErrorKind, HardwareAuthToken, OperationContext, PointerContext, SensorId,
    SessionState, UserId,
};
pub use worker::Worker;

/// Vendor code reported alongside errors raised by the session itself
pub const SESSION_VENDOR_CODE: i32 = 0;
