//! Simulated sensor engine
//!
//! Keeps enrollments, the pending challenge, the authenticator id and the
//! lockout counter in memory. Nothing survives a restart. Which finger the
//! next touch "matches" is a configuration knob, so scripted clients can
//! drive both the success and the failure paths.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fpsim_core::{
    AcquiredInfo, Engine, ErrorKind, HardwareAuthToken, PointerContext, SessionCallback,
    SignalSink,
};

use crate::lockout::{LockoutPolicy, LockoutState};

/// Authenticator type bit for fingerprint tokens
const AUTHENTICATOR_TYPE_FINGERPRINT: i32 = 1 << 1;

/// Interval between cancellation polls while the engine waits
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const VENDOR_CODE: i32 = 0;

/// Behavior knobs for [`SimulatedEngine`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enrollment the simulated finger matches; `None` means no finger is on
    /// the sensor unless a pointer-down says otherwise
    pub enrollment_hit: Option<i32>,
    /// Captures needed to complete an enrollment
    pub enroll_steps: u32,
    /// Simulated capture latency (milliseconds)
    pub step_latency_ms: u64,
    /// Enrollment capacity of the sensor
    pub max_enrollments: usize,
    /// Lockout policy for failed authentications
    pub lockout: LockoutPolicy,
    /// Wait for a finger-down before capturing
    pub wait_for_finger_down: bool,
    /// How long to wait for the finger (milliseconds)
    pub finger_down_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enrollment_hit: None,
            enroll_steps: 3,
            step_latency_ms: 100,
            max_enrollments: 5,
            lockout: LockoutPolicy::default(),
            wait_for_finger_down: false,
            finger_down_timeout_ms: 5_000,
        }
    }
}

/// Point-in-time view of the engine, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub enrollments: Vec<i32>,
    pub challenge_pending: bool,
    pub authenticator_id: i64,
    pub failed_attempts: u32,
    pub finger_down: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    enrollments: BTreeSet<i32>,
    next_enrollment_id: i32,
    challenge: Option<i64>,
    authenticator_id: Option<i64>,
    failed_attempts: u32,
    locked_until: Option<Instant>,
    finger_down: bool,
}

enum WaitOutcome {
    Ready,
    Canceled,
    TimedOut,
}

/// In-memory engine behind the simulated sensor
pub struct SimulatedEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
}

impl SimulatedEngine {
    pub fn new(config: EngineConfig) -> Self {
        info!(
            "Simulated engine: {} enroll steps, {}ms latency, capacity {}",
            config.enroll_steps, config.step_latency_ms, config.max_enrollments
        );
        Self {
            config,
            state: Mutex::new(EngineState {
                next_enrollment_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state();
        EngineSnapshot {
            enrollments: state.enrollments.iter().copied().collect(),
            challenge_pending: state.challenge.is_some(),
            authenticator_id: state.authenticator_id.unwrap_or(0),
            failed_attempts: state.failed_attempts,
            finger_down: state.finger_down,
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.config.step_latency_ms)
    }

    /// Sleep for `duration`, polling `cancel`
    fn sleep(&self, duration: Duration, cancel: &SignalSink) -> WaitOutcome {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_fired() {
                return WaitOutcome::Canceled;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Ready;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Wait for a finger on the sensor when configured to
    fn wait_for_finger(&self, cancel: &SignalSink) -> WaitOutcome {
        if !self.config.wait_for_finger_down {
            return WaitOutcome::Ready;
        }

        debug!("Waiting for finger down");
        let deadline = Instant::now() + Duration::from_millis(self.config.finger_down_timeout_ms);
        loop {
            if cancel.is_fired() {
                return WaitOutcome::Canceled;
            }
            if self.state().finger_down {
                return WaitOutcome::Ready;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait for the finger, then for one capture. Reports the error and
    /// returns `false` if the capture did not happen.
    fn capture(&self, cb: &dyn SessionCallback, cancel: &SignalSink) -> bool {
        let outcome = match self.wait_for_finger(cancel) {
            WaitOutcome::Ready => self.sleep(self.latency(), cancel),
            other => other,
        };
        match outcome {
            WaitOutcome::Ready => true,
            WaitOutcome::Canceled => {
                info!("Capture canceled");
                cb.on_error(ErrorKind::Canceled, VENDOR_CODE);
                false
            }
            WaitOutcome::TimedOut => {
                info!("No finger within {}ms", self.config.finger_down_timeout_ms);
                cb.on_error(ErrorKind::Timeout, VENDOR_CODE);
                false
            }
        }
    }

    fn finger_present(&self) -> bool {
        self.state().finger_down || self.config.enrollment_hit.is_some()
    }

    /// Current lockout, if any, as seen by an authentication attempt
    fn active_lockout(&self, state: &EngineState) -> LockoutState {
        match self.config.lockout.lockout_state(state.failed_attempts) {
            LockoutState::Permanent => LockoutState::Permanent,
            _ => match state.locked_until {
                Some(until) => {
                    let now = Instant::now();
                    if until > now {
                        LockoutState::Timed(until - now)
                    } else {
                        LockoutState::None
                    }
                }
                None => LockoutState::None,
            },
        }
    }

    fn report_lockout(cb: &dyn SessionCallback, lockout: LockoutState) {
        match lockout {
            LockoutState::Timed(remaining) => {
                cb.on_lockout_timed(i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX))
            }
            LockoutState::Permanent => cb.on_lockout_permanent(),
            LockoutState::None => {}
        }
    }

    fn fresh_authenticator_id() -> i64 {
        // Zero means "no enrollments" to clients
        loop {
            let id: i64 = rand::thread_rng().gen();
            if id != 0 {
                return id;
            }
        }
    }

    fn auth_token(operation_id: i64, authenticator_id: i64) -> HardwareAuthToken {
        let mut mac = vec![0u8; 32];
        rand::thread_rng().fill(&mut mac[..]);
        HardwareAuthToken {
            challenge: operation_id,
            user_id: 0,
            authenticator_id,
            authenticator_type: AUTHENTICATOR_TYPE_FINGERPRINT,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            mac,
        }
    }
}

impl Engine for SimulatedEngine {
    fn generate_challenge(&self, cb: &dyn SessionCallback) {
        let challenge: i64 = rand::thread_rng().gen();
        self.state().challenge = Some(challenge);
        debug!("Generated challenge");
        cb.on_challenge_generated(challenge);
    }

    fn revoke_challenge(&self, cb: &dyn SessionCallback, challenge: i64) {
        {
            let mut state = self.state();
            if state.challenge == Some(challenge) {
                state.challenge = None;
                debug!("Revoked challenge");
            } else {
                debug!("Revoke for unknown challenge ignored");
            }
        }
        cb.on_challenge_revoked(challenge);
    }

    fn enroll(&self, cb: &dyn SessionCallback, hat: HardwareAuthToken, cancel: SignalSink) {
        let enrollment_id = {
            let mut state = self.state();
            if state.challenge.is_none() || state.challenge != Some(hat.challenge) {
                warn!("Enroll token does not match the pending challenge");
                drop(state);
                cb.on_error(ErrorKind::UnableToProcess, VENDOR_CODE);
                return;
            }
            if state.enrollments.len() >= self.config.max_enrollments {
                warn!(
                    "Enrollment capacity of {} reached",
                    self.config.max_enrollments
                );
                drop(state);
                cb.on_error(ErrorKind::NoSpace, VENDOR_CODE);
                return;
            }
            let id = state.next_enrollment_id;
            state.next_enrollment_id += 1;
            id
        };

        let steps = self.config.enroll_steps.max(1);
        for step in 1..=steps {
            if !self.capture(cb, &cancel) {
                return;
            }
            cb.on_acquired(AcquiredInfo::Good, VENDOR_CODE);

            let remaining = (steps - step) as i32;
            if remaining == 0 {
                let mut state = self.state();
                state.enrollments.insert(enrollment_id);
                if state.authenticator_id.is_none() {
                    state.authenticator_id = Some(Self::fresh_authenticator_id());
                }
            }
            cb.on_enrollment_progress(enrollment_id, remaining);
        }
        info!("Enrolled finger {}", enrollment_id);
    }

    fn authenticate(&self, cb: &dyn SessionCallback, operation_id: i64, cancel: SignalSink) {
        let lockout = self.active_lockout(&self.state());
        if lockout != LockoutState::None {
            info!("Authentication rejected: sensor locked out ({:?})", lockout);
            Self::report_lockout(cb, lockout);
            cb.on_error(ErrorKind::UnableToProcess, VENDOR_CODE);
            return;
        }

        if !self.capture(cb, &cancel) {
            return;
        }
        cb.on_acquired(AcquiredInfo::Good, VENDOR_CODE);

        let mut state = self.state();
        let matched = self
            .config
            .enrollment_hit
            .filter(|hit| state.enrollments.contains(hit));

        match matched {
            Some(enrollment_id) => {
                state.failed_attempts = 0;
                state.locked_until = None;
                let authenticator_id = *state
                    .authenticator_id
                    .get_or_insert_with(Self::fresh_authenticator_id);
                drop(state);
                info!("Authenticated as enrollment {}", enrollment_id);
                cb.on_authentication_succeeded(
                    enrollment_id,
                    Self::auth_token(operation_id, authenticator_id),
                );
            }
            None => {
                state.failed_attempts += 1;
                let new_lockout = self.config.lockout.lockout_state(state.failed_attempts);
                if let LockoutState::Timed(duration) = new_lockout {
                    state.locked_until = Some(Instant::now() + duration);
                }
                let failures = state.failed_attempts;
                drop(state);

                info!("Authentication failed ({} consecutive)", failures);
                Self::report_lockout(cb, new_lockout);
                cb.on_authentication_failed();
            }
        }
    }

    fn detect_interaction(&self, cb: &dyn SessionCallback, cancel: SignalSink) {
        if !self.capture(cb, &cancel) {
            return;
        }
        if self.finger_present() {
            cb.on_interaction_detected();
        } else {
            debug!("No interaction detected");
            cb.on_error(ErrorKind::Timeout, VENDOR_CODE);
        }
    }

    fn enumerate_enrollments(&self, cb: &dyn SessionCallback) {
        let enrollments: Vec<i32> = self.state().enrollments.iter().copied().collect();
        cb.on_enrollments_enumerated(enrollments);
    }

    fn remove_enrollments(&self, cb: &dyn SessionCallback, enrollment_ids: Vec<i32>) {
        {
            let mut state = self.state();
            for id in &enrollment_ids {
                if !state.enrollments.remove(id) {
                    debug!("Enrollment {} not found", id);
                }
            }
            if state.enrollments.is_empty() {
                state.authenticator_id = None;
            }
        }
        cb.on_enrollments_removed(enrollment_ids);
    }

    fn get_authenticator_id(&self, cb: &dyn SessionCallback) {
        let id = {
            let mut state = self.state();
            if state.enrollments.is_empty() {
                0
            } else {
                *state
                    .authenticator_id
                    .get_or_insert_with(Self::fresh_authenticator_id)
            }
        };
        cb.on_authenticator_id_retrieved(id);
    }

    fn invalidate_authenticator_id(&self, cb: &dyn SessionCallback) {
        let id = Self::fresh_authenticator_id();
        self.state().authenticator_id = Some(id);
        info!("Authenticator id invalidated");
        cb.on_authenticator_id_invalidated(id);
    }

    fn reset_lockout(&self, cb: &dyn SessionCallback, hat: HardwareAuthToken) {
        if hat.mac.is_empty() {
            warn!("Lockout reset token has no MAC");
            cb.on_error(ErrorKind::UnableToProcess, VENDOR_CODE);
            return;
        }
        {
            let mut state = self.state();
            state.failed_attempts = 0;
            state.locked_until = None;
        }
        info!("Lockout cleared");
        cb.on_lockout_cleared();
    }

    fn notify_finger_down(&self) {
        self.state().finger_down = true;
    }

    fn on_pointer_down(&self, pointer: PointerContext) {
        debug!(
            "Pointer {} down at ({}, {})",
            pointer.pointer_id, pointer.x, pointer.y
        );
        self.state().finger_down = true;
    }

    fn on_pointer_up(&self, pointer_id: i32) {
        debug!("Pointer {} up", pointer_id);
        self.state().finger_down = false;
    }

    fn on_ui_ready(&self) {
        debug!("UI ready");
    }
}
