// SPDX-License-Identifier: GPL-3.0-or-later

//! The trait object every concrete buffer transport implements, so
//! `Buffer<T>` can be handed a `ThreadBuffer<T>` or a cross-process
//! transport interchangeably.

use crate::error::ConduitError;
use crate::event::Event;
use crate::item::Item;
use crate::policy::UnexpectedSituationPolicy;
use crate::timeout::Timeout;

/// The operations a buffer transport must provide.
///
/// `Buffer<T>`, `PublisherSession<T>` and `SubscriptionSession<T>` are all
/// written against this trait; none of them know whether they are talking
/// to an in-process queue or a transport that crosses a process boundary.
pub trait BufferCore<T>: Send + Sync {
    /// The buffer's name, used in every error this buffer can raise.
    fn name(&self) -> &str;

    /// Push one item, applying `policy` if the buffer is (or becomes, by
    /// the time `timeout` elapses) full.
    fn push(&self, item: Item<T>, timeout: Timeout, policy: UnexpectedSituationPolicy)
        -> Result<(), ConduitError>;

    /// Pop the oldest item, or `Err(ConduitError::Empty)` if none is
    /// queued right now. Never blocks: the servicing loop is responsible
    /// for waiting on the subscriber's wake-up `Event` between polls.
    fn pop(&self) -> Result<Item<T>, ConduitError>;

    /// Register a new publisher, cancelling any armed discard timer.
    fn attach_publisher(&self) -> Result<(), ConduitError>;

    /// Detach one publisher. Idempotent at the buffer level is not
    /// required — callers (`PublisherSession`) guarantee it is called at
    /// most once per session — but the reference count itself must never
    /// underflow, so implementations saturate at zero.
    fn detach_publisher(&self);

    /// Register the sole subscriber. Fails if one is already attached.
    fn attach_subscriber(&self, event: Option<Event>) -> Result<(), ConduitError>;

    /// Detach the subscriber, if one is attached.
    fn detach_subscriber(&self);

    /// `true` once `exit()` has been called.
    fn is_closed(&self) -> bool;

    /// End the buffer's lifecycle: purge queued items, invalidate sessions.
    fn exit(&self);
}
