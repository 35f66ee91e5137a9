//! Client callback sink
//!
//! Every operation outcome reaches the client through [`SessionCallback`],
//! never through the return value of the request that scheduled it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{AcquiredInfo, ErrorKind, HardwareAuthToken};

/// Notifications delivered to the client that owns a session
pub trait SessionCallback: Send + Sync {
    fn on_challenge_generated(&self, challenge: i64);

    fn on_challenge_revoked(&self, challenge: i64);

    fn on_acquired(&self, info: AcquiredInfo, vendor_code: i32);

    fn on_error(&self, error: ErrorKind, vendor_code: i32);

    /// Enrollment advanced; `remaining == 0` completes it
    fn on_enrollment_progress(&self, enrollment_id: i32, remaining: i32);

    fn on_authentication_succeeded(&self, enrollment_id: i32, hat: HardwareAuthToken);

    fn on_authentication_failed(&self);

    fn on_lockout_timed(&self, duration_ms: i64);

    fn on_lockout_permanent(&self);

    fn on_lockout_cleared(&self);

    fn on_interaction_detected(&self);

    fn on_enrollments_enumerated(&self, enrollment_ids: Vec<i32>);

    fn on_enrollments_removed(&self, enrollment_ids: Vec<i32>);

    fn on_authenticator_id_retrieved(&self, authenticator_id: i64);

    fn on_authenticator_id_invalidated(&self, new_authenticator_id: i64);

    fn on_session_closed(&self);
}

/// Serializable form of a [`SessionCallback`] notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ChallengeGenerated {
        challenge: i64,
    },
    ChallengeRevoked {
        challenge: i64,
    },
    Acquired {
        info: AcquiredInfo,
        vendor_code: i32,
    },
    Error {
        error: ErrorKind,
        vendor_code: i32,
    },
    EnrollmentProgress {
        enrollment_id: i32,
        remaining: i32,
    },
    AuthenticationSucceeded {
        enrollment_id: i32,
        hat: HardwareAuthToken,
    },
    AuthenticationFailed,
    LockoutTimed {
        duration_ms: i64,
    },
    LockoutPermanent,
    LockoutCleared,
    InteractionDetected,
    EnrollmentsEnumerated {
        enrollment_ids: Vec<i32>,
    },
    EnrollmentsRemoved {
        enrollment_ids: Vec<i32>,
    },
    AuthenticatorIdRetrieved {
        authenticator_id: i64,
    },
    AuthenticatorIdInvalidated {
        authenticator_id: i64,
    },
    SessionClosed,
}

impl SessionEvent {
    /// Whether this notification ends the operation that produced it
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::EnrollmentProgress { remaining, .. } => *remaining == 0,
            Self::Acquired { .. } | Self::LockoutTimed { .. } | Self::LockoutPermanent => false,
            _ => true,
        }
    }

    /// Replay this event onto a callback
    pub fn deliver(self, callback: &dyn SessionCallback) {
        match self {
            Self::ChallengeGenerated { challenge } => callback.on_challenge_generated(challenge),
            Self::ChallengeRevoked { challenge } => callback.on_challenge_revoked(challenge),
            Self::Acquired { info, vendor_code } => callback.on_acquired(info, vendor_code),
            Self::Error { error, vendor_code } => callback.on_error(error, vendor_code),
            Self::EnrollmentProgress {
                enrollment_id,
                remaining,
            } => callback.on_enrollment_progress(enrollment_id, remaining),
            Self::AuthenticationSucceeded { enrollment_id, hat } => {
                callback.on_authentication_succeeded(enrollment_id, hat)
            }
            Self::AuthenticationFailed => callback.on_authentication_failed(),
            Self::LockoutTimed { duration_ms } => callback.on_lockout_timed(duration_ms),
            Self::LockoutPermanent => callback.on_lockout_permanent(),
            Self::LockoutCleared => callback.on_lockout_cleared(),
            Self::InteractionDetected => callback.on_interaction_detected(),
            Self::EnrollmentsEnumerated { enrollment_ids } => {
                callback.on_enrollments_enumerated(enrollment_ids)
            }
            Self::EnrollmentsRemoved { enrollment_ids } => {
                callback.on_enrollments_removed(enrollment_ids)
            }
            Self::AuthenticatorIdRetrieved { authenticator_id } => {
                callback.on_authenticator_id_retrieved(authenticator_id)
            }
            Self::AuthenticatorIdInvalidated { authenticator_id } => {
                callback.on_authenticator_id_invalidated(authenticator_id)
            }
            Self::SessionClosed => callback.on_session_closed(),
        }
    }
}

/// Callback that forwards every notification into a channel as a
/// [`SessionEvent`].
///
/// Notifications sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelCallback {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Create a callback together with the receiver draining it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Dropping session event, receiver is gone");
        }
    }
}

impl SessionCallback for ChannelCallback {
    fn on_challenge_generated(&self, challenge: i64) {
        self.emit(SessionEvent::ChallengeGenerated { challenge });
    }

    fn on_challenge_revoked(&self, challenge: i64) {
        self.emit(SessionEvent::ChallengeRevoked { challenge });
    }

    fn on_acquired(&self, info: AcquiredInfo, vendor_code: i32) {
        self.emit(SessionEvent::Acquired { info, vendor_code });
    }

    fn on_error(&self, error: ErrorKind, vendor_code: i32) {
        self.emit(SessionEvent::Error { error, vendor_code });
    }

    fn on_enrollment_progress(&self, enrollment_id: i32, remaining: i32) {
        self.emit(SessionEvent::EnrollmentProgress {
            enrollment_id,
            remaining,
        });
    }

    fn on_authentication_succeeded(&self, enrollment_id: i32, hat: HardwareAuthToken) {
        self.emit(SessionEvent::AuthenticationSucceeded { enrollment_id, hat });
    }

    fn on_authentication_failed(&self) {
        self.emit(SessionEvent::AuthenticationFailed);
    }

    fn on_lockout_timed(&self, duration_ms: i64) {
        self.emit(SessionEvent::LockoutTimed { duration_ms });
    }

    fn on_lockout_permanent(&self) {
        self.emit(SessionEvent::LockoutPermanent);
    }

    fn on_lockout_cleared(&self) {
        self.emit(SessionEvent::LockoutCleared);
    }

    fn on_interaction_detected(&self) {
        self.emit(SessionEvent::InteractionDetected);
    }

    fn on_enrollments_enumerated(&self, enrollment_ids: Vec<i32>) {
        self.emit(SessionEvent::EnrollmentsEnumerated { enrollment_ids });
    }

    fn on_enrollments_removed(&self, enrollment_ids: Vec<i32>) {
        self.emit(SessionEvent::EnrollmentsRemoved { enrollment_ids });
    }

    fn on_authenticator_id_retrieved(&self, authenticator_id: i64) {
        self.emit(SessionEvent::AuthenticatorIdRetrieved { authenticator_id });
    }

    fn on_authenticator_id_invalidated(&self, new_authenticator_id: i64) {
        self.emit(SessionEvent::AuthenticatorIdInvalidated {
            authenticator_id: new_authenticator_id,
        });
    }

    fn on_session_closed(&self) {
        self.emit(SessionEvent::SessionClosed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(SessionEvent::AuthenticationFailed.is_terminal());
        assert!(SessionEvent::Error {
            error: ErrorKind::Canceled,
            vendor_code: 0
        }
        .is_terminal());
        assert!(SessionEvent::EnrollmentProgress {
            enrollment_id: 1,
            remaining: 0
        }
        .is_terminal());

        assert!(!SessionEvent::EnrollmentProgress {
            enrollment_id: 1,
            remaining: 2
        }
        .is_terminal());
        assert!(!SessionEvent::LockoutTimed { duration_ms: 100 }.is_terminal());
        assert!(!SessionEvent::Acquired {
            info: AcquiredInfo::Good,
            vendor_code: 0
        }
        .is_terminal());
    }

    #[test]
    fn test_channel_callback_forwards_in_order() {
        let (callback, mut rx) = ChannelCallback::channel();
        callback.on_acquired(AcquiredInfo::Good, 0);
        callback.on_enrollment_progress(3, 0);
        callback.on_session_closed();

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Acquired {
                info: AcquiredInfo::Good,
                vendor_code: 0
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::EnrollmentProgress {
                enrollment_id: 3,
                remaining: 0
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SessionClosed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_callback_survives_dropped_receiver() {
        let (callback, rx) = ChannelCallback::channel();
        drop(rx);
        callback.on_authentication_failed();
    }

    #[test]
    fn test_deliver_replays_onto_callback() {
        let (callback, mut rx) = ChannelCallback::channel();
        let event = SessionEvent::EnrollmentsRemoved {
            enrollment_ids: vec![1, 4],
        };
        event.clone().deliver(&callback);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(SessionEvent::LockoutTimed { duration_ms: 30_000 }).unwrap();
        assert_eq!(json["kind"], "lockout_timed");
        assert_eq!(json["duration_ms"], 30_000);
    }
}
