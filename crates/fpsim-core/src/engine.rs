//! Sensor engine interface
//!
//! The engine does the actual sensor work. Every method is called on the
//! session's worker thread, must return before the session goes back to idle,
//! and reports its outcome (success, domain error or cancellation) through the
//! callback it is given rather than through a return value.

use crate::callback::SessionCallback;
use crate::cancellation::SignalSink;
use crate::types::{HardwareAuthToken, PointerContext};

/// Backend that executes session operations
pub trait Engine: Send + Sync {
    fn generate_challenge(&self, cb: &dyn SessionCallback);

    fn revoke_challenge(&self, cb: &dyn SessionCallback, challenge: i64);

    /// Enroll a new finger. Long-running engines should poll `cancel` between
    /// steps and report [`crate::ErrorKind::Canceled`] when it fires.
    fn enroll(&self, cb: &dyn SessionCallback, hat: HardwareAuthToken, cancel: SignalSink);

    fn authenticate(&self, cb: &dyn SessionCallback, operation_id: i64, cancel: SignalSink);

    fn detect_interaction(&self, cb: &dyn SessionCallback, cancel: SignalSink);

    fn enumerate_enrollments(&self, cb: &dyn SessionCallback);

    fn remove_enrollments(&self, cb: &dyn SessionCallback, enrollment_ids: Vec<i32>);

    fn get_authenticator_id(&self, cb: &dyn SessionCallback);

    fn invalidate_authenticator_id(&self, cb: &dyn SessionCallback);

    fn reset_lockout(&self, cb: &dyn SessionCallback, hat: HardwareAuthToken);

    /// Called synchronously on the requesting thread, ahead of the queued
    /// pointer-down work, so a running operation can see the touch
    fn notify_finger_down(&self);

    fn on_pointer_down(&self, pointer: PointerContext);

    fn on_pointer_up(&self, pointer_id: i32);

    fn on_ui_ready(&self);
}
