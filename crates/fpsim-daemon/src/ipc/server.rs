//! IPC server implementation

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use fpsim_core::{
    CancellationHandle, ChannelCallback, ClientLinkMonitor, Session, SessionState, SingleFlight,
};

use crate::error::{DaemonError, Result};
use crate::service::SensorService;

use super::socket::SocketListener;
use super::types::{IpcRequest, IpcResponse};

/// IPC server
pub struct IpcServer {
    /// Socket path
    socket_path: PathBuf,

    /// Sensor service shared by all connections
    service: Arc<SensorService>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf, service: Arc<SensorService>) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then remove the socket
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = SocketListener::bind(&self.socket_path).await?;
        info!("IPC server listening on {:?}", listener.path());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("IPC server stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let service = Arc::clone(&self.service);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, service).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        }

        drop(listener);
        Ok(())
    }
}

/// Per-connection client state.
///
/// Dropping it, however the connection ends, counts as the client dying.
struct ClientConnection {
    service: Arc<SensorService>,
    outgoing: mpsc::UnboundedSender<IpcResponse>,
    session: Option<Arc<Session>>,
    monitor: Option<ClientLinkMonitor>,
    forwarder: Option<JoinHandle<()>>,
    cancel_handles: HashMap<String, CancellationHandle>,
}

impl ClientConnection {
    fn new(service: Arc<SensorService>, outgoing: mpsc::UnboundedSender<IpcResponse>) -> Self {
        Self {
            service,
            outgoing,
            session: None,
            monitor: None,
            forwarder: None,
            cancel_handles: HashMap::new(),
        }
    }

    fn handle(&mut self, request: IpcRequest) -> IpcResponse {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        }
    }

    fn dispatch(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        match request {
            IpcRequest::Ping => Ok(IpcResponse::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),

            IpcRequest::GetSensorProps => Ok(IpcResponse::SensorProps {
                props: self.service.sensor_props(),
            }),

            IpcRequest::GetStatus => Ok(IpcResponse::Status {
                status: self.service.status(),
            }),

            IpcRequest::SimFingerDown => {
                self.service.sim_finger_down();
                Ok(IpcResponse::Ok)
            }

            IpcRequest::CreateSession { sensor_id, user_id } => {
                self.open_session(sensor_id, user_id)
            }

            request => {
                let session = self.session.clone().ok_or(DaemonError::NoSession)?;
                self.session_request(&session, request)
            }
        }
    }

    fn open_session(&mut self, sensor_id: i32, user_id: i32) -> Result<IpcResponse> {
        let (callback, mut events) = ChannelCallback::channel();
        let session = self
            .service
            .create_session(sensor_id, user_id, Arc::new(callback))?;

        let outgoing = self.outgoing.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if outgoing.send(IpcResponse::Event { event }).is_err() {
                    break;
                }
            }
        });

        // A replaced forwarder drains its closed session's events and exits
        self.forwarder = Some(forwarder);
        self.monitor = Some(session.link_to_death());
        self.session = Some(session);
        self.cancel_handles.clear();

        Ok(IpcResponse::SessionCreated { sensor_id, user_id })
    }

    fn cancelable(&mut self, handle: CancellationHandle) -> IpcResponse {
        let id = Uuid::new_v4().to_string();
        self.cancel_handles.insert(id.clone(), handle);
        IpcResponse::Scheduled {
            cancel_handle: Some(id),
        }
    }

    /// Admit a new operation on `session`.
    ///
    /// Only this connection schedules on its session, so once both states
    /// read `Idling` every earlier operation has finished and its cancel
    /// handle can go.
    fn admit_operation(&mut self, session: &Session) -> Result<()> {
        if session.is_closed() {
            return Ok(());
        }
        let scheduled = session.scheduled_state();
        let current = session.current_state();
        if scheduled == SessionState::Idling && current == SessionState::Idling {
            self.cancel_handles.clear();
            return Ok(());
        }
        match session.policy() {
            SingleFlight::Strict => {
                let busy = if scheduled != SessionState::Idling {
                    scheduled
                } else {
                    current
                };
                debug!("Rejecting request while {} is in flight", busy);
                Err(DaemonError::OperationInFlight(busy))
            }
            SingleFlight::Relaxed => Ok(()),
        }
    }

    fn session_request(&mut self, session: &Session, request: IpcRequest) -> Result<IpcResponse> {
        if request.starts_operation() {
            self.admit_operation(session)?;
        }

        let scheduled = IpcResponse::Scheduled {
            cancel_handle: None,
        };

        let response = match request {
            IpcRequest::GenerateChallenge => {
                session.generate_challenge()?;
                scheduled
            }
            IpcRequest::RevokeChallenge { challenge } => {
                session.revoke_challenge(challenge)?;
                scheduled
            }
            IpcRequest::Enroll { hat } => {
                let handle = session.enroll(hat)?;
                self.cancelable(handle)
            }
            IpcRequest::Authenticate { operation_id } => {
                let handle = session.authenticate(operation_id)?;
                self.cancelable(handle)
            }
            IpcRequest::DetectInteraction => {
                let handle = session.detect_interaction()?;
                self.cancelable(handle)
            }
            IpcRequest::EnumerateEnrollments => {
                session.enumerate_enrollments()?;
                scheduled
            }
            IpcRequest::RemoveEnrollments { enrollment_ids } => {
                session.remove_enrollments(enrollment_ids)?;
                scheduled
            }
            IpcRequest::GetAuthenticatorId => {
                session.get_authenticator_id()?;
                scheduled
            }
            IpcRequest::InvalidateAuthenticatorId => {
                session.invalidate_authenticator_id()?;
                scheduled
            }
            IpcRequest::ResetLockout { hat } => {
                session.reset_lockout(hat)?;
                scheduled
            }
            IpcRequest::Cancel { handle } => {
                self.cancel_handles
                    .get(&handle)
                    .ok_or_else(|| DaemonError::UnknownCancelHandle(handle.clone()))?
                    .cancel();
                IpcResponse::Ok
            }
            IpcRequest::PointerDown { pointer } => {
                session.on_pointer_down(pointer)?;
                IpcResponse::Ok
            }
            IpcRequest::PointerUp { pointer_id } => {
                session.on_pointer_up(pointer_id)?;
                IpcResponse::Ok
            }
            IpcRequest::UiReady => {
                session.on_ui_ready()?;
                IpcResponse::Ok
            }
            IpcRequest::Close => {
                session.close();
                self.cancel_handles.clear();
                IpcResponse::Ok
            }
            IpcRequest::Ping
            | IpcRequest::GetSensorProps
            | IpcRequest::GetStatus
            | IpcRequest::SimFingerDown
            | IpcRequest::CreateSession { .. } => {
                return Err(DaemonError::Ipc("Not a session request".to_string()))
            }
        };
        Ok(response)
    }

    /// The client went away: close its session if still open
    fn disconnected(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            if monitor.client_died() {
                info!("Closed session of disconnected client");
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.cancel_handles.clear();
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.disconnected();
    }
}

/// Handle a single IPC connection
async fn handle_connection(stream: UnixStream, service: Arc<SensorService>) -> Result<()> {
    let (reader, writer) = tokio::io::split(stream);
    let (outgoing, responses) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_responses(writer, responses));

    let mut client = ClientConnection::new(service, outgoing.clone());
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let result = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(DaemonError::from(e)),
        }

        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                debug!("Received IPC request: {:?}", request);
                client.handle(request)
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        if outgoing.send(response).is_err() {
            break Err(DaemonError::Ipc("Connection writer stopped".to_string()));
        }
    };

    drop(client);
    drop(outgoing);

    match writer_task.await {
        Ok(Err(e)) => debug!("Writer ended with error: {}", e),
        Err(e) => error!("Writer task failed: {}", e),
        Ok(Ok(())) => {}
    }
    result
}

/// Drain queued responses and events onto the socket
async fn write_responses<W>(
    mut writer: W,
    mut responses: mpsc::UnboundedReceiver<IpcResponse>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        send_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn send_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DaemonConfig;
    use fpsim_core::SessionEvent;

    fn service() -> Arc<SensorService> {
        service_with(DaemonConfig::default())
    }

    fn service_with(mut config: DaemonConfig) -> Arc<SensorService> {
        config.engine.step_latency_ms = 0;
        config.worker_name = "ipc-server-test".to_string();
        Arc::new(SensorService::new(&config).unwrap())
    }

    /// Service whose captures block until a finger lands or they are canceled
    fn waiting_service() -> Arc<SensorService> {
        let mut config = DaemonConfig::default();
        config.engine.wait_for_finger_down = true;
        config.engine.finger_down_timeout_ms = 10_000;
        service_with(config)
    }

    fn open(client: &mut ClientConnection, user_id: i32) {
        assert_eq!(
            client.handle(IpcRequest::CreateSession {
                sensor_id: 5,
                user_id
            }),
            IpcResponse::SessionCreated {
                sensor_id: 5,
                user_id
            }
        );
    }

    fn cancel_handle(response: IpcResponse) -> String {
        match response {
            IpcResponse::Scheduled {
                cancel_handle: Some(handle),
            } => handle,
            other => panic!("unexpected: {:?}", other),
        }
    }

    async fn until_idle(service: &SensorService) {
        for _ in 0..500 {
            let status = service.status();
            if status.scheduled_state == Some(SessionState::Idling)
                && status.current_state == Some(SessionState::Idling)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never went idle");
    }

    #[tokio::test]
    async fn test_session_request_without_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(service(), tx);
        match client.handle(IpcRequest::GenerateChallenge) {
            IpcResponse::Error { message } => assert!(message.contains("No session")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_cancel_handle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(service(), tx);
        client.handle(IpcRequest::CreateSession {
            sensor_id: 5,
            user_id: 0,
        });
        match client.handle(IpcRequest::Cancel {
            handle: "nope".to_string(),
        }) {
            IpcResponse::Error { message } => assert!(message.contains("nope")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_closes_session() {
        let service = service();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(Arc::clone(&service), tx);
        assert_eq!(
            client.handle(IpcRequest::CreateSession {
                sensor_id: 5,
                user_id: 0
            }),
            IpcResponse::SessionCreated {
                sensor_id: 5,
                user_id: 0
            }
        );

        drop(client);
        let session = service.current_session().unwrap();
        assert_eq!(session.current_state(), SessionState::Closed);
        assert!(!service.status().session_open);
    }

    #[tokio::test]
    async fn test_connection_panic_closes_session() {
        let service = service();
        let task = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let (tx, _rx) = mpsc::unbounded_channel();
                let mut client = ClientConnection::new(service, tx);
                open(&mut client, 0);
                panic!("connection handler failed");
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!service.status().session_open);
        assert_eq!(
            service.current_session().unwrap().current_state(),
            SessionState::Closed
        );
    }

    #[tokio::test]
    async fn test_overlapping_operation_rejected() {
        let service = waiting_service();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(Arc::clone(&service), tx);
        open(&mut client, 0);

        let handle = cancel_handle(client.handle(IpcRequest::Authenticate { operation_id: 1 }));
        for request in [
            IpcRequest::Authenticate { operation_id: 2 },
            IpcRequest::GenerateChallenge,
            IpcRequest::EnumerateEnrollments,
        ] {
            match client.handle(request) {
                IpcResponse::Error { message } => assert!(message.contains("in flight")),
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert!(service.status().session_open);

        assert_eq!(
            client.handle(IpcRequest::Cancel { handle }),
            IpcResponse::Ok
        );
        until_idle(&service).await;

        assert_eq!(
            client.handle(IpcRequest::EnumerateEnrollments),
            IpcResponse::Scheduled {
                cancel_handle: None
            }
        );
        until_idle(&service).await;
        assert!(service.status().session_open);
    }

    #[tokio::test]
    async fn test_finished_operation_handles_are_dropped() {
        let service = service();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(Arc::clone(&service), tx);
        open(&mut client, 0);

        let first = cancel_handle(client.handle(IpcRequest::DetectInteraction));
        until_idle(&service).await;
        let second = cancel_handle(client.handle(IpcRequest::DetectInteraction));
        assert_eq!(client.cancel_handles.len(), 1);

        match client.handle(IpcRequest::Cancel {
            handle: first.clone(),
        }) {
            IpcResponse::Error { message } => assert!(message.contains(&first)),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            client.handle(IpcRequest::Cancel { handle: second }),
            IpcResponse::Ok
        );
    }

    #[tokio::test]
    async fn test_reopen_delivers_previous_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(service(), tx);
        open(&mut client, 0);
        assert_eq!(client.handle(IpcRequest::Close), IpcResponse::Ok);
        open(&mut client, 1);

        let forwarded = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            forwarded,
            Some(IpcResponse::Event {
                event: SessionEvent::SessionClosed
            })
        );
    }

    #[tokio::test]
    async fn test_cancelable_request_returns_handle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(service(), tx);
        client.handle(IpcRequest::CreateSession {
            sensor_id: 5,
            user_id: 0,
        });

        let handle = match client.handle(IpcRequest::DetectInteraction) {
            IpcResponse::Scheduled {
                cancel_handle: Some(handle),
            } => handle,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(
            client.handle(IpcRequest::Cancel { handle }),
            IpcResponse::Ok
        );
    }
}
