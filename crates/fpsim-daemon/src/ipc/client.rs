//! IPC client implementation

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

use fpsim_core::SessionEvent;

use crate::error::{DaemonError, Result};

use super::socket;
use super::types::{IpcRequest, IpcResponse};

/// IPC client for CLI use
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a single request on a fresh connection and get its response
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut connection = self.connect().await?;
        connection.request(request).await
    }

    /// Open a persistent connection, needed for sessions
    pub async fn connect(&self) -> Result<IpcConnection> {
        let stream = socket::connect(&self.socket_path).await?;
        Ok(IpcConnection::new(stream))
    }

    /// Check if daemon is running
    pub async fn ping(&self) -> bool {
        matches!(
            self.request(&IpcRequest::Ping).await,
            Ok(IpcResponse::Pong { .. })
        )
    }
}

/// Persistent connection to the daemon.
///
/// Session events may arrive between a request and its response; they are
/// buffered and handed out by [`IpcConnection::next_event`].
pub struct IpcConnection {
    reader: BufReader<ReadHalf<UnixStream>>,
    writer: WriteHalf<UnixStream>,
    pending_events: VecDeque<SessionEvent>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            pending_events: VecDeque::new(),
        }
    }

    /// Write a request without waiting for anything
    pub async fn send(&mut self, request: &IpcRequest) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next message from the daemon, whatever it is
    pub async fn recv(&mut self) -> Result<IpcResponse> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(DaemonError::Ipc("Connection closed by daemon".to_string()));
        }
        let response: IpcResponse = serde_json::from_str(&line)?;
        Ok(response)
    }

    /// Send a request and wait for its response, buffering events that
    /// arrive in between
    pub async fn request(&mut self, request: &IpcRequest) -> Result<IpcResponse> {
        self.send(request).await?;
        loop {
            match self.recv().await? {
                IpcResponse::Event { event } => self.pending_events.push_back(event),
                response => return Ok(response),
            }
        }
    }

    /// Wait for the next session event
    pub async fn next_event(&mut self) -> Result<SessionEvent> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        match self.recv().await? {
            IpcResponse::Event { event } => Ok(event),
            other => Err(DaemonError::Ipc(format!(
                "Expected a session event, got {:?}",
                other
            ))),
        }
    }

    /// Collect events up to and including the next terminal one
    pub async fn until_terminal(&mut self) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await?;
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return Ok(events);
            }
        }
    }
}
