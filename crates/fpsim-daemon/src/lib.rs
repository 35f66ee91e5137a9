//! fpsim Daemon - Simulated fingerprint sensor service
//!
//! This crate provides:
//! - An in-memory simulated sensor engine with lockout tracking
//! - The sensor service that owns the engine, the worker and the session slot
//! - IPC server and client over a Unix socket, with client-death detection

pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lockout;
pub mod service;

pub use config::DaemonConfig;
pub use engine::{EngineConfig, SimulatedEngine};
pub use error::{DaemonError, Result};
pub use ipc::{IpcClient, IpcConnection, IpcRequest, IpcResponse, IpcServer};
pub use lockout::{LockoutPolicy, LockoutState};
pub use service::{SensorProps, SensorService, ServiceStatus};
