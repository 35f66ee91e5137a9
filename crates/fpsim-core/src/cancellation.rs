//! One-shot cooperative cancellation
//!
//! A cancellation signal is a single boolean flag shared between two typed
//! ends. The [`SignalSource`] is held by whoever may cancel; the
//! [`SignalSink`] is captured by the task and handed to the engine, which
//! polls it between units of work.
//!
//! - `fire` may be called any number of times from any thread; only the first
//!   call changes anything.
//! - `is_fired` never blocks.
//! - The flag lives until both ends are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create a fresh, unfired signal pair
pub fn pair() -> (SignalSource, SignalSink) {
    let flag = Arc::new(AtomicBool::new(false));
    (
        SignalSource {
            flag: Arc::clone(&flag),
        },
        SignalSink { flag },
    )
}

/// Raising end of a cancellation signal
#[derive(Debug, Clone)]
pub struct SignalSource {
    flag: Arc<AtomicBool>,
}

impl SignalSource {
    /// Raise the signal.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// signal had already been fired.
    pub fn fire(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Whether the signal has been raised
    pub fn is_fired(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Polling end of a cancellation signal
#[derive(Debug, Clone)]
pub struct SignalSink {
    flag: Arc<AtomicBool>,
}

impl SignalSink {
    /// Whether the signal has been raised
    pub fn is_fired(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Opaque handle returned to the client for a cancelable operation.
///
/// The only right it carries is to cancel.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    source: SignalSource,
}

impl CancellationHandle {
    pub(crate) fn new(source: SignalSource) -> Self {
        Self { source }
    }

    /// Request cancellation of the operation.
    ///
    /// Takes effect for certain only if the operation has not started yet;
    /// once the engine is running it depends on the engine polling its sink.
    pub fn cancel(&self) {
        if !self.source.fire() {
            tracing::debug!("Cancellation already requested");
        }
    }

    /// Whether cancellation has been requested
    pub fn is_canceled(&self) -> bool {
        self.source.is_fired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unfired_sink_reads_not_canceled() {
        let (_source, sink) = pair();
        assert!(!sink.is_fired());
    }

    #[test]
    fn test_fire_is_idempotent() {
        let (source, sink) = pair();
        assert!(source.fire());
        assert!(!source.fire());
        assert!(!source.fire());
        assert!(sink.is_fired());
    }

    #[test]
    fn test_sink_outlives_source() {
        let (source, sink) = pair();
        source.fire();
        drop(source);
        assert!(sink.is_fired());
    }

    #[test]
    fn test_concurrent_fire_has_single_winner() {
        let (source, sink) = pair();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                thread::spawn(move || source.fire())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(sink.is_fired());
    }

    #[test]
    fn test_handle_cancel() {
        let (source, sink) = pair();
        let handle = CancellationHandle::new(source);
        assert!(!handle.is_canceled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_canceled());
        assert!(sink.is_fired());
    }
}
