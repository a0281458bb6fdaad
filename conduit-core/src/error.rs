// SPDX-License-Identifier: GPL-3.0-or-later

//! The error taxonomy carried through the framework.
//!
//! `ConduitError` is the single error type that flows inside `Item::Complete`
//! and `Status::Complete`. Narrower errors at IO/network boundaries (see
//! `conduit-ipc`) convert into it with `#[from]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised anywhere in the framework: `Full`, `Empty`, `AccessDenied`,
/// `Invalid`, `TransportNotAllowed`, `WorkerFailure`, `StillAlive`,
/// `Timeout`, `Io`.
///
/// Carries `Serialize`/`Deserialize` alongside `thiserror::Error` because it
/// rides inside `Item::Complete` and `Status::Complete`, both of which cross
/// the wire in `conduit-ipc`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConduitError {
    /// A publisher could not push because the buffer was full and the
    /// overflow policy for the call was `Raise`.
    #[error("buffer '{buffer}' is full")]
    Full {
        /// Name of the buffer that rejected the push.
        buffer: String,
    },

    /// A subscription was polled while its buffer held no items.
    #[error("buffer '{buffer}' is empty")]
    Empty {
        /// Name of the buffer that was polled.
        buffer: String,
    },

    /// A scope-illegal attribute access was attempted.
    #[error("attribute '{attribute}' cannot be accessed from the {scope} scope")]
    AccessDenied {
        /// Name of the attribute, as declared in `scope_policy()`.
        attribute: String,
        /// Which scope performed the illegal access.
        scope: String,
    },

    /// Misuse of the public API (double subscribe, missing binding, etc.).
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// An attribute's declared scope policy forbids crossing the boundary
    /// the chosen `Runner` kind requires.
    #[error("attribute '{attribute}' cannot cross a {boundary} boundary")]
    TransportNotAllowed {
        /// Name of the offending attribute.
        attribute: String,
        /// `"thread"` or `"process"`.
        boundary: String,
    },

    /// An exception escaped `Runnable::execute` or the completion-drain
    /// sequence and could not be delivered to any subscriber.
    #[error("worker failure: {0}")]
    WorkerFailure(String),

    /// A `Runner::exit` join timed out.
    #[error("worker did not stop within the shutdown timeout")]
    StillAlive,

    /// A blocking wait for a status message did not complete in time.
    #[error("timed out waiting for a status message")]
    Timeout,

    /// An I/O error surfaced from a buffer implementation or a runner.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ConduitError {
    /// Wrap an arbitrary worker panic/error payload into `WorkerFailure`,
    /// preserving the original message as the variant's sole payload.
    pub fn worker_failure(message: impl Into<String>) -> Self {
        ConduitError::WorkerFailure(message.into())
    }

    /// True for errors that represent the orderly end of a stream rather
    /// than a defect (used by the servicing loop to decide whether a
    /// `Complete(err)` should break the loop).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConduitError::Empty { .. })
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> Self {
        ConduitError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_error_names_the_buffer() {
        let err = ConduitError::Full {
            buffer: "inputs".to_string(),
        };
        assert!(err.to_string().contains("inputs"));
    }

    #[test]
    fn transport_not_allowed_names_attribute_and_boundary() {
        let err = ConduitError::TransportNotAllowed {
            attribute: "handle".to_string(),
            boundary: "process".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("handle"));
        assert!(text.contains("process"));
    }
}
