//! IPC protocol types
//!
//! Newline-delimited JSON messages between the daemon and its clients. One
//! connection is one client; the session it opens lives and dies with it.

use serde::{Deserialize, Serialize};

use fpsim_core::{HardwareAuthToken, PointerContext, SessionEvent};

use crate::service::{SensorProps, ServiceStatus};

/// IPC request types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if daemon is running
    Ping,

    /// Describe the simulated sensor
    GetSensorProps,

    /// Dump service and engine state
    GetStatus,

    /// Put a finger on the sensor without a session
    SimFingerDown,

    /// Open a session on this connection
    CreateSession { sensor_id: i32, user_id: i32 },

    GenerateChallenge,

    RevokeChallenge { challenge: i64 },

    Enroll { hat: HardwareAuthToken },

    Authenticate { operation_id: i64 },

    DetectInteraction,

    EnumerateEnrollments,

    RemoveEnrollments { enrollment_ids: Vec<i32> },

    GetAuthenticatorId,

    InvalidateAuthenticatorId,

    ResetLockout { hat: HardwareAuthToken },

    /// Cancel an operation by the handle returned when it was scheduled
    Cancel { handle: String },

    PointerDown { pointer: PointerContext },

    PointerUp { pointer_id: i32 },

    UiReady,

    /// Close this connection's session
    Close,
}

impl IpcRequest {
    /// Whether the request needs an open session on the connection
    pub fn needs_session(&self) -> bool {
        !matches!(
            self,
            Self::Ping
                | Self::GetSensorProps
                | Self::GetStatus
                | Self::SimFingerDown
                | Self::CreateSession { .. }
        )
    }

    /// Whether the request queues an operation on the session worker
    pub fn starts_operation(&self) -> bool {
        self.needs_session()
            && !matches!(
                self,
                Self::Cancel { .. }
                    | Self::PointerDown { .. }
                    | Self::PointerUp { .. }
                    | Self::UiReady
                    | Self::Close
            )
    }
}

/// IPC response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Success with no data
    Ok,

    /// Pong response
    Pong { version: String },

    /// Sensor description
    SensorProps { props: SensorProps },

    /// Service state dump
    Status { status: ServiceStatus },

    /// Session opened
    SessionCreated { sensor_id: i32, user_id: i32 },

    /// Operation accepted; cancelable operations carry a handle
    Scheduled { cancel_handle: Option<String> },

    /// Error response
    Error { message: String },

    /// Asynchronous session notification
    Event { event: SessionEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_value(IpcRequest::CreateSession {
            sensor_id: 5,
            user_id: 0,
        })
        .unwrap();
        assert_eq!(json["type"], "CreateSession");
        assert_eq!(json["sensor_id"], 5);

        let parsed: IpcRequest =
            serde_json::from_str(r#"{"type":"RemoveEnrollments","enrollment_ids":[1,2]}"#)
                .unwrap();
        assert_eq!(
            parsed,
            IpcRequest::RemoveEnrollments {
                enrollment_ids: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_event_response_nests_event_kind() {
        let json = serde_json::to_value(IpcResponse::Event {
            event: SessionEvent::AuthenticationFailed,
        })
        .unwrap();
        assert_eq!(json["type"], "Event");
        assert_eq!(json["event"]["kind"], "authentication_failed");
    }

    #[test]
    fn test_needs_session() {
        assert!(!IpcRequest::Ping.needs_session());
        assert!(!IpcRequest::CreateSession {
            sensor_id: 0,
            user_id: 0
        }
        .needs_session());
        assert!(IpcRequest::Close.needs_session());
        assert!(IpcRequest::Authenticate { operation_id: 1 }.needs_session());
    }

    #[test]
    fn test_starts_operation() {
        assert!(IpcRequest::GenerateChallenge.starts_operation());
        assert!(IpcRequest::EnumerateEnrollments.starts_operation());
        assert!(IpcRequest::DetectInteraction.starts_operation());
        assert!(!IpcRequest::UiReady.starts_operation());
        assert!(!IpcRequest::Close.starts_operation());
        assert!(!IpcRequest::Cancel {
            handle: "h".to_string()
        }
        .starts_operation());
        assert!(!IpcRequest::Ping.starts_operation());
    }
}
