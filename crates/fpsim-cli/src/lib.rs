//! fpsim CLI - Command-line client for the simulated fingerprint daemon
//!
//! Each session command opens its own connection, runs one operation to
//! its terminal notification and closes the session.

pub mod client;
pub mod commands;

pub use client::{ClientError, FpsimClient, SessionClient};
pub use commands::*;
