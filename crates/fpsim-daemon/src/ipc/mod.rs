//! IPC transport for session clients
//!
//! Newline-delimited JSON over a Unix domain socket. Each connection may open
//! one session; session notifications are pushed on the same stream as
//! [`IpcResponse::Event`] messages, and closing the connection counts as the
//! client dying.

mod client;
mod server;
mod socket;
mod types;

// Public API
pub use client::{IpcClient, IpcConnection};
pub use server::IpcServer;
pub use types::{IpcRequest, IpcResponse};
