//! Session state machine
//!
//! A session accepts operation requests from one client and runs each of them
//! on the shared [`Worker`]. Every start request goes through four steps:
//!
//! 1. **Schedule** on the caller's thread: `scheduled_state = X`
//! 2. **Enter** on the worker: `current_state = X`, `scheduled_state = Idling`
//! 3. **Execute** the engine call, unless the operation was canceled first
//! 4. **Idle**: `current_state = Idling` unless the session has been closed
//!
//! Requests return as soon as the task is queued. Outcomes reach the client
//! only through its [`SessionCallback`].
//!
//! Under [`SingleFlight::Strict`] a request that overlaps another scheduled or
//! running operation is a fatal invariant violation. The callback handed to
//! the engine idles the session as soon as a terminal notification goes out,
//! so a client may schedule its next operation from inside that notification.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::callback::SessionCallback;
use crate::cancellation::{self, CancellationHandle, SignalSink};
use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::monitor::ClientLinkMonitor;
use crate::types::{
    AcquiredInfo, ErrorKind, HardwareAuthToken, OperationContext, PointerContext, SensorId,
    SessionState, UserId,
};
use crate::worker::Worker;
use crate::SESSION_VENDOR_CODE;

/// How a session reacts to a request that overlaps an unfinished operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleFlight {
    /// Overlap is a fatal invariant violation
    #[default]
    Strict,
    /// Overlap is logged and the new request replaces the scheduled one
    Relaxed,
}

/// Scheduled/current state pair, readable from any thread
#[derive(Debug)]
struct StateCell {
    scheduled: AtomicU8,
    current: AtomicU8,
}

impl StateCell {
    fn new() -> Self {
        Self {
            scheduled: AtomicU8::new(SessionState::Idling.as_u8()),
            current: AtomicU8::new(SessionState::Idling.as_u8()),
        }
    }

    fn decode(raw: u8) -> SessionState {
        // Only valid discriminants are ever stored
        SessionState::from_u8(raw).unwrap_or(SessionState::Closed)
    }

    fn scheduled(&self) -> SessionState {
        Self::decode(self.scheduled.load(Ordering::Acquire))
    }

    fn current(&self) -> SessionState {
        Self::decode(self.current.load(Ordering::Acquire))
    }

    /// Return to `Idling` unless the session is closed.
    ///
    /// Returns `true` if this call changed the state.
    fn enter_idling(&self) -> bool {
        let idling = SessionState::Idling.as_u8();
        let closed = SessionState::Closed.as_u8();
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw != closed && raw != idling).then_some(idling)
            })
            .is_ok()
    }

    /// Make `state` current unless the session is closed
    fn enter(&self, state: SessionState) -> bool {
        let closed = SessionState::Closed.as_u8();
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw != closed).then_some(state.as_u8())
            })
            .is_ok()
    }

    /// Clear a scheduled state that will never be entered
    fn abandon_scheduled(&self, state: SessionState) {
        let _ = self.scheduled.compare_exchange(
            state.as_u8(),
            SessionState::Idling.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// State shared between the session handle and its queued tasks
struct Shared {
    sensor_id: SensorId,
    user_id: UserId,
    states: StateCell,
    engine: Arc<dyn Engine>,
    callback: Arc<dyn SessionCallback>,
}

impl Shared {
    /// Enter the scheduled `state`.
    ///
    /// Returns `false` if the session was closed first, in which case
    /// nothing changes.
    fn enter_state_or_crash(&self, state: SessionState) -> bool {
        let scheduled = self.states.scheduled();
        if scheduled != state {
            panic!(
                "Cannot enter {}: scheduled state is {} (current {})",
                state,
                scheduled,
                self.states.current()
            );
        }
        if !self.states.enter(state) {
            return false;
        }
        self.states
            .scheduled
            .store(SessionState::Idling.as_u8(), Ordering::Release);
        debug!(
            "Session {}/{} entered {}",
            self.sensor_id, self.user_id, state
        );
        true
    }

    fn enter_idling(&self) {
        if self.states.enter_idling() {
            debug!("Session {}/{} is idling", self.sensor_id, self.user_id);
        }
    }
}

/// Callback handed to the engine.
///
/// Terminal notifications idle the session before they are forwarded, so the
/// client observes `Idling` by the time it hears the operation has finished.
struct TerminalAwareCallback {
    shared: Arc<Shared>,
}

impl TerminalAwareCallback {
    fn finish(&self) -> &dyn SessionCallback {
        self.shared.enter_idling();
        self.shared.callback.as_ref()
    }

    fn client(&self) -> &dyn SessionCallback {
        self.shared.callback.as_ref()
    }
}

impl SessionCallback for TerminalAwareCallback {
    fn on_challenge_generated(&self, challenge: i64) {
        self.finish().on_challenge_generated(challenge);
    }

    fn on_challenge_revoked(&self, challenge: i64) {
        self.finish().on_challenge_revoked(challenge);
    }

    fn on_acquired(&self, info: AcquiredInfo, vendor_code: i32) {
        self.client().on_acquired(info, vendor_code);
    }

    fn on_error(&self, error: ErrorKind, vendor_code: i32) {
        self.finish().on_error(error, vendor_code);
    }

    fn on_enrollment_progress(&self, enrollment_id: i32, remaining: i32) {
        if remaining == 0 {
            self.finish().on_enrollment_progress(enrollment_id, remaining);
        } else {
            self.client().on_enrollment_progress(enrollment_id, remaining);
        }
    }

    fn on_authentication_succeeded(&self, enrollment_id: i32, hat: HardwareAuthToken) {
        self.finish().on_authentication_succeeded(enrollment_id, hat);
    }

    fn on_authentication_failed(&self) {
        self.finish().on_authentication_failed();
    }

    fn on_lockout_timed(&self, duration_ms: i64) {
        self.client().on_lockout_timed(duration_ms);
    }

    fn on_lockout_permanent(&self) {
        self.client().on_lockout_permanent();
    }

    fn on_lockout_cleared(&self) {
        self.finish().on_lockout_cleared();
    }

    fn on_interaction_detected(&self) {
        self.finish().on_interaction_detected();
    }

    fn on_enrollments_enumerated(&self, enrollment_ids: Vec<i32>) {
        self.finish().on_enrollments_enumerated(enrollment_ids);
    }

    fn on_enrollments_removed(&self, enrollment_ids: Vec<i32>) {
        self.finish().on_enrollments_removed(enrollment_ids);
    }

    fn on_authenticator_id_retrieved(&self, authenticator_id: i64) {
        self.finish().on_authenticator_id_retrieved(authenticator_id);
    }

    fn on_authenticator_id_invalidated(&self, new_authenticator_id: i64) {
        self.finish()
            .on_authenticator_id_invalidated(new_authenticator_id);
    }

    fn on_session_closed(&self) {
        // Only `Session::close` announces closure
        warn!("Engine tried to report session closure; ignoring");
    }
}

/// A client's session with one sensor
pub struct Session {
    shared: Arc<Shared>,
    worker: Arc<Worker>,
    policy: SingleFlight,
    death_link: AtomicBool,
}

impl Session {
    pub fn new(
        sensor_id: SensorId,
        user_id: UserId,
        callback: Arc<dyn SessionCallback>,
        engine: Arc<dyn Engine>,
        worker: Arc<Worker>,
        policy: SingleFlight,
    ) -> Self {
        info!(
            "Creating session for sensor {} user {} ({:?} single-flight)",
            sensor_id, user_id, policy
        );
        Self {
            shared: Arc::new(Shared {
                sensor_id,
                user_id,
                states: StateCell::new(),
                engine,
                callback,
            }),
            worker,
            policy,
            death_link: AtomicBool::new(false),
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.shared.sensor_id
    }

    pub fn user_id(&self) -> UserId {
        self.shared.user_id
    }

    pub fn policy(&self) -> SingleFlight {
        self.policy
    }

    /// Operation accepted but not yet started
    pub fn scheduled_state(&self) -> SessionState {
        self.shared.states.scheduled()
    }

    /// Operation executing on the worker, `Idling` or `Closed`
    pub fn current_state(&self) -> SessionState {
        self.shared.states.current()
    }

    pub fn is_closed(&self) -> bool {
        self.current_state() == SessionState::Closed
    }

    /// Register interest in the client's death.
    ///
    /// The returned monitor closes this session when the client goes away.
    pub fn link_to_death(self: &Arc<Self>) -> ClientLinkMonitor {
        self.death_link.store(true, Ordering::Release);
        debug!(
            "Linked session {}/{} to client death",
            self.shared.sensor_id, self.shared.user_id
        );
        ClientLinkMonitor::new(Arc::downgrade(self))
    }

    /// Whether a death link is registered and has not been released by close
    pub fn is_linked_to_death(&self) -> bool {
        self.death_link.load(Ordering::Acquire)
    }

    fn schedule_state_or_crash(&self, state: SessionState) -> Result<()> {
        let states = &self.shared.states;
        if self.is_closed() {
            warn!("Rejecting {}: session is closed", state);
            return Err(CoreError::SessionClosed);
        }

        let claimed = states.scheduled.compare_exchange(
            SessionState::Idling.as_u8(),
            state.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let current = states.current();
        let overlap = claimed.is_err()
            || (current != SessionState::Idling && current != SessionState::Closed);

        if overlap {
            let scheduled = claimed
                .err()
                .map(StateCell::decode)
                .unwrap_or(SessionState::Idling);
            match self.policy {
                SingleFlight::Strict => panic!(
                    "Cannot schedule {}: scheduled state is {}, current state is {}",
                    state, scheduled, current
                ),
                SingleFlight::Relaxed => {
                    warn!(
                        "Scheduling {} over unfinished work (scheduled {}, current {})",
                        state, scheduled, current
                    );
                    states.scheduled.store(state.as_u8(), Ordering::Release);
                }
            }
        }

        debug!("Scheduled {}", state);
        Ok(())
    }

    /// Schedule `state` and queue the task that runs `op` for it.
    ///
    /// When `cancel` is given and has fired by the time the task starts, the
    /// client receives `Canceled` and the engine is never called.
    fn run_operation<F>(&self, state: SessionState, cancel: Option<SignalSink>, op: F) -> Result<()>
    where
        F: FnOnce(&dyn Engine, &dyn SessionCallback) + Send + 'static,
    {
        self.schedule_state_or_crash(state)?;

        let shared = Arc::clone(&self.shared);
        let submitted = self.worker.submit(move || {
            if !shared.enter_state_or_crash(state) {
                shared.states.abandon_scheduled(state);
                info!("Skipping {}: session closed before it started", state);
                return;
            }

            let proxy = TerminalAwareCallback {
                shared: Arc::clone(&shared),
            };
            if cancel.as_ref().is_some_and(SignalSink::is_fired) {
                info!("{} canceled before it started", state);
                proxy.on_error(ErrorKind::Canceled, SESSION_VENDOR_CODE);
            } else {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| op(shared.engine.as_ref(), &proxy)));
                if outcome.is_err() {
                    error!("Engine panicked while {}", state);
                    proxy.on_error(ErrorKind::HwUnavailable, SESSION_VENDOR_CODE);
                }
            }

            shared.enter_idling();
        });

        if let Err(e) = submitted {
            self.shared.states.abandon_scheduled(state);
            warn!("Could not queue {}: {}", state, e);
            return Err(e);
        }
        Ok(())
    }

    fn run_cancelable<F>(&self, state: SessionState, op: F) -> Result<CancellationHandle>
    where
        F: FnOnce(&dyn Engine, &dyn SessionCallback, SignalSink) + Send + 'static,
    {
        let (source, sink) = cancellation::pair();
        let engine_sink = sink.clone();
        self.run_operation(state, Some(sink), move |engine, cb| {
            op(engine, cb, engine_sink)
        })?;
        Ok(CancellationHandle::new(source))
    }

    /// Queue auxiliary work that does not take part in single-flight
    fn run_auxiliary<F>(&self, label: &'static str, op: F) -> Result<()>
    where
        F: FnOnce(&dyn Engine) + Send + 'static,
    {
        if self.is_closed() {
            warn!("Rejecting {}: session is closed", label);
            return Err(CoreError::SessionClosed);
        }

        let shared = Arc::clone(&self.shared);
        self.worker.submit(move || {
            if panic::catch_unwind(AssertUnwindSafe(|| op(shared.engine.as_ref()))).is_err() {
                error!("Engine panicked handling {}", label);
            }
            shared.enter_idling();
        })
    }

    fn log_request(&self, name: &str) {
        info!(
            "{} requested on sensor {} user {}",
            name, self.shared.sensor_id, self.shared.user_id
        );
    }

    pub fn generate_challenge(&self) -> Result<()> {
        self.log_request("generate_challenge");
        self.run_operation(SessionState::GeneratingChallenge, None, |engine, cb| {
            engine.generate_challenge(cb)
        })
    }

    pub fn revoke_challenge(&self, challenge: i64) -> Result<()> {
        self.log_request("revoke_challenge");
        self.run_operation(SessionState::RevokingChallenge, None, move |engine, cb| {
            engine.revoke_challenge(cb, challenge)
        })
    }

    pub fn enroll(&self, hat: HardwareAuthToken) -> Result<CancellationHandle> {
        self.log_request("enroll");
        self.run_cancelable(SessionState::Enrolling, move |engine, cb, cancel| {
            engine.enroll(cb, hat, cancel)
        })
    }

    pub fn authenticate(&self, operation_id: i64) -> Result<CancellationHandle> {
        self.log_request("authenticate");
        self.run_cancelable(SessionState::Authenticating, move |engine, cb, cancel| {
            engine.authenticate(cb, operation_id, cancel)
        })
    }

    pub fn detect_interaction(&self) -> Result<CancellationHandle> {
        self.log_request("detect_interaction");
        self.run_cancelable(SessionState::DetectingInteraction, |engine, cb, cancel| {
            engine.detect_interaction(cb, cancel)
        })
    }

    pub fn enumerate_enrollments(&self) -> Result<()> {
        self.log_request("enumerate_enrollments");
        self.run_operation(SessionState::EnumeratingEnrollments, None, |engine, cb| {
            engine.enumerate_enrollments(cb)
        })
    }

    pub fn remove_enrollments(&self, enrollment_ids: Vec<i32>) -> Result<()> {
        info!(
            "remove_enrollments requested on sensor {} user {} ({} ids)",
            self.shared.sensor_id,
            self.shared.user_id,
            enrollment_ids.len()
        );
        self.run_operation(SessionState::RemovingEnrollments, None, move |engine, cb| {
            engine.remove_enrollments(cb, enrollment_ids)
        })
    }

    pub fn get_authenticator_id(&self) -> Result<()> {
        self.log_request("get_authenticator_id");
        self.run_operation(SessionState::GettingAuthenticatorId, None, |engine, cb| {
            engine.get_authenticator_id(cb)
        })
    }

    pub fn invalidate_authenticator_id(&self) -> Result<()> {
        self.log_request("invalidate_authenticator_id");
        self.run_operation(
            SessionState::InvalidatingAuthenticatorId,
            None,
            |engine, cb| engine.invalidate_authenticator_id(cb),
        )
    }

    pub fn reset_lockout(&self, hat: HardwareAuthToken) -> Result<()> {
        self.log_request("reset_lockout");
        self.run_operation(SessionState::ResettingLockout, None, move |engine, cb| {
            engine.reset_lockout(cb, hat)
        })
    }

    pub fn enroll_with_context(
        &self,
        hat: HardwareAuthToken,
        context: &OperationContext,
    ) -> Result<CancellationHandle> {
        debug!("enroll context: {:?}", context);
        self.enroll(hat)
    }

    pub fn authenticate_with_context(
        &self,
        operation_id: i64,
        context: &OperationContext,
    ) -> Result<CancellationHandle> {
        debug!("authenticate context: {:?}", context);
        self.authenticate(operation_id)
    }

    pub fn detect_interaction_with_context(
        &self,
        context: &OperationContext,
    ) -> Result<CancellationHandle> {
        debug!("detect_interaction context: {:?}", context);
        self.detect_interaction()
    }

    /// Touch reported by the display.
    ///
    /// The engine hears about the finger immediately so that a running
    /// operation can react, then the full pointer event is queued.
    pub fn on_pointer_down(&self, pointer: PointerContext) -> Result<()> {
        self.log_request("on_pointer_down");
        if self.is_closed() {
            warn!("Rejecting on_pointer_down: session is closed");
            return Err(CoreError::SessionClosed);
        }
        self.shared.engine.notify_finger_down();
        self.run_auxiliary("on_pointer_down", move |engine| {
            engine.on_pointer_down(pointer)
        })
    }

    pub fn on_pointer_up(&self, pointer_id: i32) -> Result<()> {
        self.log_request("on_pointer_up");
        self.run_auxiliary("on_pointer_up", move |engine| engine.on_pointer_up(pointer_id))
    }

    pub fn on_ui_ready(&self) -> Result<()> {
        self.log_request("on_ui_ready");
        self.run_auxiliary("on_ui_ready", |engine| engine.on_ui_ready())
    }

    pub fn on_pointer_down_with_context(&self, pointer: PointerContext) -> Result<()> {
        self.on_pointer_down(pointer)
    }

    pub fn on_pointer_up_with_context(&self, pointer: PointerContext) -> Result<()> {
        self.on_pointer_up(pointer.pointer_id)
    }

    pub fn on_context_changed(&self, context: &OperationContext) -> Result<()> {
        debug!("Context changed: {:?}", context);
        Ok(())
    }

    pub fn on_pointer_cancel_with_context(&self, pointer: PointerContext) -> Result<()> {
        debug!("Pointer {} canceled", pointer.pointer_id);
        Ok(())
    }

    pub fn set_ignore_display_touches(&self, should_ignore: bool) -> Result<()> {
        debug!("Ignore display touches: {}", should_ignore);
        Ok(())
    }

    /// Close the session.
    ///
    /// Marks the session `Closed` on the calling thread, tells the client and
    /// releases the death link. Only the first call has any effect; an
    /// operation still running on the worker finishes but leaves the session
    /// closed. Returns `true` for the call that performed the close.
    pub fn close(&self) -> bool {
        let previous = StateCell::decode(
            self.shared
                .states
                .current
                .swap(SessionState::Closed.as_u8(), Ordering::AcqRel),
        );
        if previous == SessionState::Closed {
            debug!(
                "Session {}/{} already closed",
                self.shared.sensor_id, self.shared.user_id
            );
            return false;
        }

        info!(
            "Closing session {}/{} (was {})",
            self.shared.sensor_id, self.shared.user_id, previous
        );
        self.shared.callback.on_session_closed();
        if self.death_link.swap(false, Ordering::AcqRel) {
            debug!("Released client death link");
        }
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sensor_id", &self.shared.sensor_id)
            .field("user_id", &self.shared.user_id)
            .field("scheduled_state", &self.scheduled_state())
            .field("current_state", &self.current_state())
            .field("policy", &self.policy)
            .finish()
    }
}
