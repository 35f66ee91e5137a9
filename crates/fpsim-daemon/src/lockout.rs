//! Progressive lockout policy for failed authentications
//!
//! Failures below the threshold are free. From the threshold on, each further
//! failure escalates the timed lockout, until the permanent threshold is
//! reached and only a lockout reset with a valid token helps:
//!
//! - 1-4 failures: No lockout
//! - 5 failures: 10 second lockout
//! - 6 failures: 30 second lockout
//! - 7+ failures: 1 minute lockout
//! - 20 failures: Permanent lockout

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lockout the sensor is in after a number of consecutive failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    None,
    Timed(Duration),
    Permanent,
}

/// Progressive lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Failures before the first timed lockout
    pub threshold: u32,
    /// Timed lockout durations for each level past the threshold (in
    /// milliseconds); the last entry repeats
    pub lockout_durations_ms: Vec<u64>,
    /// Failures that lock the sensor out permanently
    pub permanent_threshold: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_durations_ms: vec![
                10_000, // 5 failures: 10 seconds
                30_000, // 6 failures: 30 seconds
                60_000, // 7+ failures: 1 minute
            ],
            permanent_threshold: 20,
        }
    }
}

impl LockoutPolicy {
    /// Lockout in effect after `failed_attempts` consecutive failures
    pub fn lockout_state(&self, failed_attempts: u32) -> LockoutState {
        if failed_attempts >= self.permanent_threshold {
            return LockoutState::Permanent;
        }
        if failed_attempts < self.threshold {
            return LockoutState::None;
        }

        let level = (failed_attempts - self.threshold) as usize;
        match self
            .lockout_durations_ms
            .get(level)
            .or_else(|| self.lockout_durations_ms.last())
        {
            Some(ms) => LockoutState::Timed(Duration::from_millis(*ms)),
            None => LockoutState::None,
        }
    }

    /// Whether the given failure count is at or past a lockout threshold
    pub fn is_locked(&self, failed_attempts: u32) -> bool {
        self.lockout_state(failed_attempts) != LockoutState::None
    }

    /// Validate threshold ordering
    pub fn validate(&self) -> crate::Result<()> {
        if self.threshold == 0 || self.permanent_threshold < self.threshold {
            return Err(crate::DaemonError::Config(format!(
                "lockout thresholds out of order: timed {} permanent {}",
                self.threshold, self.permanent_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_lockout_below_threshold() {
        let policy = LockoutPolicy::default();
        for failures in 0..5 {
            assert_eq!(policy.lockout_state(failures), LockoutState::None);
        }
    }

    #[test]
    fn test_timed_lockout_escalates() {
        let policy = LockoutPolicy::default();
        assert_eq!(
            policy.lockout_state(5),
            LockoutState::Timed(Duration::from_secs(10))
        );
        assert_eq!(
            policy.lockout_state(6),
            LockoutState::Timed(Duration::from_secs(30))
        );
        assert_eq!(
            policy.lockout_state(7),
            LockoutState::Timed(Duration::from_secs(60))
        );
        // Last level repeats until permanent
        assert_eq!(
            policy.lockout_state(19),
            LockoutState::Timed(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_permanent_lockout() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.lockout_state(20), LockoutState::Permanent);
        assert_eq!(policy.lockout_state(100), LockoutState::Permanent);
        assert!(policy.is_locked(20));
        assert!(!policy.is_locked(1));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let policy = LockoutPolicy {
            threshold: 10,
            lockout_durations_ms: vec![1_000],
            permanent_threshold: 3,
        };
        assert!(policy.validate().is_err());
        assert!(LockoutPolicy::default().validate().is_ok());
    }
}
