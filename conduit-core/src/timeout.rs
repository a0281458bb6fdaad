// SPDX-License-Identifier: GPL-3.0-or-later

//! One calling convention for blocking, non-blocking and infinite waits.

use crate::error::ConduitError;
use std::time::{Duration, Instant};

/// A timeout for a blocking operation.
///
/// There are exactly three legal shapes: poll once and return (`NoWait`),
/// wait forever (`Infinite`), or wait up to a positive duration (`After`).
/// Zero and negative durations are rejected at construction so that callers
/// cannot accidentally build a timeout that behaves like `NoWait` by
/// surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return immediately if the operation cannot complete right away.
    NoWait,
    /// Block until the operation completes, however long that takes.
    Infinite,
    /// Block for at most the given, strictly positive, duration.
    After(Duration),
}

impl Timeout {
    /// Build a finite timeout from a number of seconds.
    ///
    /// Returns `ConduitError::Invalid` for zero, negative, NaN or infinite
    /// values.
    pub fn from_secs_f64(seconds: f64) -> Result<Self, ConduitError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ConduitError::Invalid(format!(
                "timeout must be a positive finite number of seconds, got {seconds}"
            )));
        }
        Ok(Timeout::After(Duration::from_secs_f64(seconds)))
    }

    /// Convert to the single representation every blocking call interprets:
    /// `None` means "do not wait at all", `Some(None)` means "wait forever",
    /// `Some(Some(deadline))` means "wait until this instant".
    ///
    /// This is the one place in the crate that interprets the three
    /// sentinel values, so every blocking call shares a single calling
    /// convention.
    pub fn deadline(self, now: Instant) -> Deadline {
        match self {
            Timeout::NoWait => Deadline::Immediate,
            Timeout::Infinite => Deadline::Never,
            Timeout::After(d) => Deadline::At(now + d),
        }
    }

    /// Remaining duration relative to `now`, or `None` if the deadline has
    /// already passed. `Infinite` never passes.
    pub fn remaining(self, now: Instant) -> Option<Duration> {
        match self.deadline(now) {
            Deadline::Immediate => Some(Duration::ZERO),
            Deadline::Never => None,
            Deadline::At(instant) => Some(instant.saturating_duration_since(now)),
        }
    }
}

/// The resolved form of a `Timeout`, anchored to a concrete instant.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    /// Do not block at all.
    Immediate,
    /// Block with no deadline.
    Never,
    /// Block until this instant.
    At(Instant),
}

impl Deadline {
    /// Whether `now` is at or past the deadline. `Never` is never expired.
    pub fn expired(self, now: Instant) -> bool {
        match self {
            Deadline::Immediate => true,
            Deadline::Never => false,
            Deadline::At(instant) => now >= instant,
        }
    }

    /// Duration left until the deadline, `None` for `Never`, `Duration::ZERO`
    /// for `Immediate` or an already-passed instant.
    pub fn remaining(self, now: Instant) -> Option<Duration> {
        match self {
            Deadline::Immediate => Some(Duration::ZERO),
            Deadline::Never => None,
            Deadline::At(instant) => Some(instant.saturating_duration_since(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_are_rejected() {
        assert!(Timeout::from_secs_f64(0.0).is_err());
        assert!(Timeout::from_secs_f64(-1.0).is_err());
        assert!(Timeout::from_secs_f64(f64::NAN).is_err());
        assert!(Timeout::from_secs_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn positive_seconds_accepted() {
        let t = Timeout::from_secs_f64(1.5).unwrap();
        assert_eq!(t, Timeout::After(Duration::from_secs_f64(1.5)));
    }

    #[test]
    fn no_wait_deadline_is_always_expired() {
        let now = Instant::now();
        assert!(Timeout::NoWait.deadline(now).expired(now));
    }

    #[test]
    fn infinite_deadline_never_expires() {
        let now = Instant::now();
        let later = now + Duration::from_secs(3600);
        assert!(!Timeout::Infinite.deadline(now).expired(later));
    }

    #[test]
    fn after_deadline_expires_once_elapsed() {
        let now = Instant::now();
        let d = Timeout::After(Duration::from_millis(10)).deadline(now);
        assert!(!d.expired(now));
        assert!(d.expired(now + Duration::from_millis(20)));
    }
}
