// SPDX-License-Identifier: GPL-3.0-or-later

//! Publisher/subscriber handles layered over `BufferCore<T>`.
//!
//! Both session types are RAII: dropping one detaches it from the buffer
//! the same way a file handle closes on drop, and detaching twice (once
//! explicitly, once via `Drop`) is a no-op rather than a double-decrement.

use super::core::BufferCore;
use crate::error::ConduitError;
use crate::item::Item;
use crate::policy::UnexpectedSituationPolicy;
use crate::timeout::Timeout;
use std::sync::Arc;

/// One publisher's handle onto a buffer.
///
/// Several sessions may be attached to the same buffer at once (the
/// multicaster's inputs, for instance, are serviced by independent
/// upstream publishers); the buffer only releases its discard timer once
/// every session has detached.
pub struct PublisherSession<T> {
    inner: Arc<dyn BufferCore<T>>,
    published_complete: bool,
    detached: bool,
}

impl<T> PublisherSession<T> {
    pub(super) fn new(inner: Arc<dyn BufferCore<T>>) -> Self {
        PublisherSession {
            inner,
            published_complete: false,
            detached: false,
        }
    }

    /// The underlying buffer's name, for diagnostics.
    pub fn buffer_name(&self) -> &str {
        self.inner.name()
    }

    /// Push one value. Fails with `ConduitError::Invalid` if this session
    /// has already published `Complete` — a session is one-shot past that
    /// point, the way a file is one-shot past `close`.
    pub fn publish_value(
        &mut self,
        value: T,
        timeout: Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        if self.published_complete {
            return Err(ConduitError::Invalid(format!(
                "publisher session on '{}' already sent Complete",
                self.inner.name()
            )));
        }
        self.inner.push(Item::Value(value), timeout, policy)
    }

    /// Signal the end of this session's contribution. `err` is carried
    /// through to every subscriber if the stream ended abnormally.
    ///
    /// On success the session is marked one-shot-complete; on a `Raise`
    /// failure (the buffer stayed full for the whole timeout) the session
    /// is left eligible to retry the completion later.
    pub fn publish_complete(
        &mut self,
        err: Option<ConduitError>,
        timeout: Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        if self.published_complete {
            return Err(ConduitError::Invalid(format!(
                "publisher session on '{}' already sent Complete",
                self.inner.name()
            )));
        }
        self.inner.push(Item::Complete(err), timeout, policy)?;
        self.published_complete = true;
        Ok(())
    }

    /// `true` once `publish_complete` has succeeded.
    pub fn has_published_complete(&self) -> bool {
        self.published_complete
    }

    /// Detach this session early. Calling it more than once, or letting
    /// the session drop afterwards, is harmless.
    pub fn unpublish(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.inner.detach_publisher();
            self.detached = true;
        }
    }
}

impl<T> Drop for PublisherSession<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// The sole subscriber's handle onto a buffer.
pub struct SubscriptionSession<T> {
    inner: Arc<dyn BufferCore<T>>,
    detached: bool,
}

impl<T> SubscriptionSession<T> {
    pub(super) fn new(inner: Arc<dyn BufferCore<T>>) -> Self {
        SubscriptionSession {
            inner,
            detached: false,
        }
    }

    /// The underlying buffer's name, for diagnostics.
    pub fn buffer_name(&self) -> &str {
        self.inner.name()
    }

    /// Pop and hand the next queued item to `handler`.
    ///
    /// Returns `Err(ConduitError::Empty)` if nothing is queued — the
    /// normal, expected outcome of a poll that should not block the
    /// servicing loop's tick — and `Err(ConduitError::Invalid)` if the
    /// buffer has been forcibly ended (`Buffer::exit`) out from under this
    /// subscription.
    pub fn call_events(&mut self, handler: impl FnOnce(Item<T>)) -> Result<(), ConduitError> {
        if self.inner.is_closed() {
            return Err(ConduitError::Invalid(format!(
                "subscription on '{}' has ended",
                self.inner.name()
            )));
        }
        let item = self.inner.pop()?;
        handler(item);
        Ok(())
    }

    /// Detach this subscription early. Calling it more than once, or
    /// letting the session drop afterwards, is harmless.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.inner.detach_subscriber();
            self.detached = true;
        }
    }
}

impl<T> Drop for SubscriptionSession<T> {
    fn drop(&mut self) {
        self.detach();
    }
}
