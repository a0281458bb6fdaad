// SPDX-License-Identifier: GPL-3.0-or-later

//! The discriminated union that flows through every buffer.

use crate::error::ConduitError;
use serde::{Deserialize, Serialize};

/// Either a user payload or the terminal marker of a publisher session.
///
/// Invariant: once a session has sent `Complete`, it must not send further
/// items — enforced by `PublisherSession`, not by this type itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item<T> {
    /// A user payload.
    Value(T),
    /// No more items will follow from this publisher session. Carries an
    /// error if the stream ended abnormally.
    Complete(Option<ConduitError>),
}

impl<T> Item<T> {
    /// `true` for `Value`.
    pub fn is_value(&self) -> bool {
        matches!(self, Item::Value(_))
    }

    /// `true` for `Complete`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Item::Complete(_))
    }

    /// The payload, if this is a `Value`.
    pub fn value(self) -> Option<T> {
        match self {
            Item::Value(v) => Some(v),
            Item::Complete(_) => None,
        }
    }

    /// The carried error, if this is a `Complete` that ended abnormally.
    pub fn complete_error(&self) -> Option<&ConduitError> {
        match self {
            Item::Complete(err) => err.as_ref(),
            Item::Value(_) => None,
        }
    }
}
