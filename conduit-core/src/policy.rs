// SPDX-License-Identifier: GPL-3.0-or-later

//! The single overflow/unexpected-situation selector, shared by buffer
//! publishing and the multicaster's per-subscriber fan-out policy.

use crate::error::ConduitError;
use serde::{Deserialize, Serialize};

/// What to do when an unexpected-but-not-impossible situation occurs —
/// today that is exactly "a publisher found its buffer full".
///
/// This is one mechanism reused at every call site that can overflow, not a
/// bespoke enum per call site.
///
/// Carries `Serialize`/`Deserialize` alongside the in-process enum because a
/// cross-process buffer's publish request travels this value over the wire
/// to the process actually holding the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnexpectedSituationPolicy {
    /// Silently drop the situation.
    Ignore,
    /// Log a warning and continue.
    Warn,
    /// Surface it as an error.
    #[default]
    Raise,
}

impl UnexpectedSituationPolicy {
    /// Apply the policy to a situation that has already happened.
    ///
    /// `describe` is evaluated lazily (only under `Warn`/`Raise`) to build
    /// the buffer-name-carrying error returned by `Raise`, and the message
    /// logged by `Warn`.
    pub fn apply(self, make_error: impl FnOnce() -> ConduitError) -> Result<(), ConduitError> {
        match self {
            UnexpectedSituationPolicy::Ignore => Ok(()),
            UnexpectedSituationPolicy::Warn => {
                log::warn!("{}", make_error());
                Ok(())
            }
            UnexpectedSituationPolicy::Raise => Err(make_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_swallows_the_situation() {
        let result = UnexpectedSituationPolicy::Ignore.apply(|| ConduitError::Full {
            buffer: "x".into(),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn raise_surfaces_the_error() {
        let result = UnexpectedSituationPolicy::Raise.apply(|| ConduitError::Full {
            buffer: "x".into(),
        });
        assert!(matches!(result, Err(ConduitError::Full { .. })));
    }

    #[test]
    fn warn_logs_and_succeeds() {
        let result = UnexpectedSituationPolicy::Warn.apply(|| ConduitError::Full {
            buffer: "x".into(),
        });
        assert!(result.is_ok());
    }
}
