// SPDX-License-Identifier: GPL-3.0-or-later

//! Bounded, single-subscriber FIFO buffers.
//!
//! A `Buffer<T>` is a thin handle around whatever concrete transport backs
//! it (`ThreadBuffer<T>` here, `conduit_ipc::CrossProcessBuffer<T>` for the
//! process case): both implement the same `BufferCore<T>` trait, so a
//! `Runnable` built against `Buffer<T>` never needs to know which `Runner`
//! kind it ended up under.
//!
//! Capacity is enforced as a bounded queue: one publish session may have
//! many live clones (one per thread that calls `publish()`), but at most
//! one subscription may be open at a time — multi-consumer fan-out is
//! `Multicaster`'s job, layered on top, not this module's.

mod core;
mod discard;
mod session;
mod thread_buffer;

pub use self::core::BufferCore;
pub use session::{PublisherSession, SubscriptionSession};
pub use thread_buffer::ThreadBuffer;

use crate::error::ConduitError;
use crate::event::Event;
use std::sync::Arc;

/// A handle to a bounded FIFO, generic over the concrete transport.
///
/// Cloning a `Buffer` clones the handle, not the underlying queue: all
/// clones refer to the same buffer, the way `Arc<T>` clones do.
pub struct Buffer<T> {
    inner: Arc<dyn BufferCore<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Buffer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Buffer<T> {
    /// Wrap an already-constructed transport behind the common facade.
    pub fn from_core(inner: Arc<dyn BufferCore<T>>) -> Self {
        Buffer { inner }
    }

    /// The buffer's name, as given at construction, used in every error
    /// message this buffer can produce.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Forcibly end the buffer's lifecycle: purge any queued items and
    /// invalidate every open session. A session's next call returns
    /// `ConduitError::Invalid`. Matches the "exited" step of the buffer
    /// lifecycle (created → entered → ... → exited).
    pub fn exit(&self) {
        self.inner.exit();
    }

    /// A stable identity for the underlying transport, independent of how
    /// many `Buffer<T>` handles have been cloned from it. Used by
    /// `Multicaster::unsubscribe` to find which subscribed output a given
    /// `Buffer<T>` handle refers to.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

/// Implemented by a `Buffer<T>` (and anything that can produce one) that
/// accepts published items.
pub trait Publishable<T> {
    /// Attach a new publisher session. Multiple sessions may be attached at
    /// once; the buffer tracks how many are live so it knows when the last
    /// one has detached.
    fn publish(&self) -> Result<PublisherSession<T>, ConduitError>;
}

/// Implemented by a `Buffer<T>` that can be drained by a single subscriber.
pub trait Observable<T> {
    /// Attach the (sole) subscriber session. Fails with
    /// `ConduitError::Invalid` if one is already attached. `event`, if
    /// given, is set at least once per item that becomes available — the
    /// servicing loop's wake-up source.
    fn subscribe(&self, event: Option<Event>) -> Result<SubscriptionSession<T>, ConduitError>;
}

impl<T> Publishable<T> for Buffer<T> {
    fn publish(&self) -> Result<PublisherSession<T>, ConduitError> {
        self.inner.attach_publisher()?;
        Ok(PublisherSession::new(self.inner.clone()))
    }
}

impl<T> Observable<T> for Buffer<T> {
    fn subscribe(&self, event: Option<Event>) -> Result<SubscriptionSession<T>, ConduitError> {
        self.inner.attach_subscriber(event)?;
        Ok(SubscriptionSession::new(self.inner.clone()))
    }
}
