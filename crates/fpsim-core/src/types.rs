//! Core types shared between the session, the engine and the transport

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Sensor identifier, guaranteed non-negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId(i32);

impl SensorId {
    /// Validate and wrap a raw sensor id
    pub fn new(id: i32) -> Result<Self> {
        if id < 0 {
            return Err(CoreError::InvalidSensorId(id));
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier, guaranteed non-negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(i32);

impl UserId {
    /// Validate and wrap a raw user id
    pub fn new(id: i32) -> Result<Self> {
        if id < 0 {
            return Err(CoreError::InvalidUserId(id));
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a session.
///
/// `Idling` is the rest state and `Closed` is terminal. Every other variant
/// names the long-running operation that is scheduled or executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Idling = 0,
    GeneratingChallenge = 1,
    RevokingChallenge = 2,
    Enrolling = 3,
    Authenticating = 4,
    DetectingInteraction = 5,
    EnumeratingEnrollments = 6,
    RemovingEnrollments = 7,
    GettingAuthenticatorId = 8,
    InvalidatingAuthenticatorId = 9,
    ResettingLockout = 10,
    Closed = 11,
}

impl SessionState {
    /// Raw discriminant, used for atomic storage
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`SessionState::as_u8`]
    pub fn from_u8(raw: u8) -> Option<Self> {
        let state = match raw {
            0 => Self::Idling,
            1 => Self::GeneratingChallenge,
            2 => Self::RevokingChallenge,
            3 => Self::Enrolling,
            4 => Self::Authenticating,
            5 => Self::DetectingInteraction,
            6 => Self::EnumeratingEnrollments,
            7 => Self::RemovingEnrollments,
            8 => Self::GettingAuthenticatorId,
            9 => Self::InvalidatingAuthenticatorId,
            10 => Self::ResettingLockout,
            11 => Self::Closed,
            _ => return None,
        };
        Some(state)
    }

    /// Whether an operation in this state can be canceled by the client
    pub fn is_cancelable(self) -> bool {
        matches!(
            self,
            Self::Enrolling | Self::Authenticating | Self::DetectingInteraction
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idling => "IDLING",
            Self::GeneratingChallenge => "GENERATING_CHALLENGE",
            Self::RevokingChallenge => "REVOKING_CHALLENGE",
            Self::Enrolling => "ENROLLING",
            Self::Authenticating => "AUTHENTICATING",
            Self::DetectingInteraction => "DETECTING_INTERACTION",
            Self::EnumeratingEnrollments => "ENUMERATING_ENROLLMENTS",
            Self::RemovingEnrollments => "REMOVING_ENROLLMENTS",
            Self::GettingAuthenticatorId => "GETTING_AUTHENTICATOR_ID",
            Self::InvalidatingAuthenticatorId => "INVALIDATING_AUTHENTICATOR_ID",
            Self::ResettingLockout => "RESETTING_LOCKOUT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Error kinds delivered through `SessionCallback::on_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HwUnavailable,
    UnableToProcess,
    Timeout,
    NoSpace,
    Canceled,
    UnableToRemove,
    Vendor,
    BadCalibration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HwUnavailable => "HW_UNAVAILABLE",
            Self::UnableToProcess => "UNABLE_TO_PROCESS",
            Self::Timeout => "TIMEOUT",
            Self::NoSpace => "NO_SPACE",
            Self::Canceled => "CANCELED",
            Self::UnableToRemove => "UNABLE_TO_REMOVE",
            Self::Vendor => "VENDOR",
            Self::BadCalibration => "BAD_CALIBRATION",
        };
        f.write_str(name)
    }
}

/// Acquisition feedback delivered through `SessionCallback::on_acquired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquiredInfo {
    Good,
    Partial,
    Insufficient,
    SensorDirty,
    TooSlow,
    TooFast,
    Vendor,
    Start,
    TooDark,
    TooBright,
    Immobile,
    RetryingCapture,
}

/// Hardware authentication token presented for enrollment and lockout reset,
/// and returned on successful authentication
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareAuthToken {
    /// Challenge or operation id this token is bound to
    pub challenge: i64,
    /// User the token was issued for
    pub user_id: i64,
    /// Authenticator id at issue time
    pub authenticator_id: i64,
    /// Authenticator type bitmask
    pub authenticator_type: i32,
    /// Issue time in milliseconds
    pub timestamp_ms: i64,
    /// Token MAC
    #[serde(with = "hex_bytes")]
    pub mac: Vec<u8>,
}

impl HardwareAuthToken {
    /// Token bound to a challenge, with a placeholder MAC
    pub fn for_challenge(challenge: i64) -> Self {
        Self {
            challenge,
            mac: vec![0u8; 32],
            ..Default::default()
        }
    }
}

/// Context accompanying `*_with_context` operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub id: i32,
    pub reason: i32,
    pub is_aod: bool,
    pub is_crypto: bool,
}

/// Touch event reported by the display
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerContext {
    pub pointer_id: i32,
    pub x: i32,
    pub y: i32,
    pub minor: f32,
    pub major: f32,
}

/// Serde helper for variable-length byte vectors as hex strings
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
