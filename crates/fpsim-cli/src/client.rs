//! Client for communicating with the fpsim daemon

use std::path::PathBuf;

use fpsim_core::{HardwareAuthToken, SessionEvent};
use fpsim_daemon::{
    DaemonConfig, DaemonError, IpcClient, IpcConnection, IpcRequest, IpcResponse, SensorProps,
    ServiceStatus,
};

/// Client for the fpsim daemon
pub struct FpsimClient {
    inner: IpcClient,
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Daemon error: {0}")]
    DaemonError(String),
}

impl ClientError {
    fn from_daemon_error(e: DaemonError) -> Self {
        match &e {
            DaemonError::DaemonNotRunning(_) => ClientError::DaemonNotRunning,
            _ => ClientError::DaemonError(e.to_string()),
        }
    }

    fn unexpected(response: IpcResponse) -> Self {
        match response {
            IpcResponse::Error { message } => ClientError::RequestFailed(message),
            other => ClientError::UnexpectedResponse(format!("{:?}", other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl FpsimClient {
    /// Create a new client with the daemon's default socket path
    pub fn new() -> Self {
        Self::with_socket_path(DaemonConfig::default_ipc_path())
    }

    /// Create a new client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        self.inner
            .request(request)
            .await
            .map_err(ClientError::from_daemon_error)
    }

    /// Check if the daemon is running
    pub async fn ping(&self) -> Result<String> {
        match self.request(&IpcRequest::Ping).await? {
            IpcResponse::Pong { version } => Ok(version),
            other => Err(ClientError::unexpected(other)),
        }
    }

    pub async fn sensor_props(&self) -> Result<SensorProps> {
        match self.request(&IpcRequest::GetSensorProps).await? {
            IpcResponse::SensorProps { props } => Ok(props),
            other => Err(ClientError::unexpected(other)),
        }
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        match self.request(&IpcRequest::GetStatus).await? {
            IpcResponse::Status { status } => Ok(status),
            other => Err(ClientError::unexpected(other)),
        }
    }

    /// Simulate a finger touching the sensor
    pub async fn finger_down(&self) -> Result<()> {
        match self.request(&IpcRequest::SimFingerDown).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(ClientError::unexpected(other)),
        }
    }

    /// Open a session that lives as long as the returned handle
    pub async fn open_session(&self, sensor_id: i32, user_id: i32) -> Result<SessionClient> {
        let mut connection = self
            .inner
            .connect()
            .await
            .map_err(ClientError::from_daemon_error)?;
        let response = connection
            .request(&IpcRequest::CreateSession { sensor_id, user_id })
            .await
            .map_err(ClientError::from_daemon_error)?;
        match response {
            IpcResponse::SessionCreated { .. } => Ok(SessionClient { connection }),
            other => Err(ClientError::unexpected(other)),
        }
    }
}

impl Default for FpsimClient {
    fn default() -> Self {
        Self::new()
    }
}

/// An open session on its own daemon connection.
///
/// Dropping it without [`SessionClient::close`] disconnects, which the
/// daemon treats as client death.
pub struct SessionClient {
    connection: IpcConnection,
}

impl SessionClient {
    /// Send an operation and return its cancel handle, if it has one
    pub async fn schedule(&mut self, request: IpcRequest) -> Result<Option<String>> {
        let response = self
            .connection
            .request(&request)
            .await
            .map_err(ClientError::from_daemon_error)?;
        match response {
            IpcResponse::Scheduled { cancel_handle } => Ok(cancel_handle),
            other => Err(ClientError::unexpected(other)),
        }
    }

    /// Send an operation and wait for the notification that ends it
    pub async fn run(&mut self, request: IpcRequest) -> Result<Vec<SessionEvent>> {
        self.schedule(request).await?;
        self.until_terminal().await
    }

    /// Send a request the daemon acknowledges with a plain `Ok`
    pub async fn signal(&mut self, request: IpcRequest) -> Result<()> {
        match self
            .connection
            .request(&request)
            .await
            .map_err(ClientError::from_daemon_error)?
        {
            IpcResponse::Ok => Ok(()),
            other => Err(ClientError::unexpected(other)),
        }
    }

    pub async fn cancel(&mut self, handle: &str) -> Result<()> {
        self.signal(IpcRequest::Cancel {
            handle: handle.to_string(),
        })
        .await
    }

    pub async fn next_event(&mut self) -> Result<SessionEvent> {
        self.connection
            .next_event()
            .await
            .map_err(ClientError::from_daemon_error)
    }

    pub async fn until_terminal(&mut self) -> Result<Vec<SessionEvent>> {
        self.connection
            .until_terminal()
            .await
            .map_err(ClientError::from_daemon_error)
    }

    /// Generate a challenge and build a token for it
    pub async fn challenge_token(&mut self) -> Result<HardwareAuthToken> {
        for event in self.run(IpcRequest::GenerateChallenge).await? {
            if let SessionEvent::ChallengeGenerated { challenge } = event {
                return Ok(HardwareAuthToken::for_challenge(challenge));
            }
        }
        Err(ClientError::RequestFailed(
            "Challenge generation failed".to_string(),
        ))
    }

    /// Close the session and wait for the daemon to confirm
    pub async fn close(mut self) -> Result<()> {
        self.signal(IpcRequest::Close).await?;
        loop {
            if let SessionEvent::SessionClosed = self.next_event().await? {
                return Ok(());
            }
        }
    }
}
