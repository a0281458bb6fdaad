// SPDX-License-Identifier: GPL-3.0-or-later

//! The unit of work a `Runner` drives: a `Runnable` builds its own
//! `MultiBufferServicingLoop` out of `RunnableBase` plumbing and runs it
//! inside `execute()`.

pub mod base;
pub mod servicing_loop;
pub mod tick;

pub use base::{OutputSlot, RunnableBase};
pub use servicing_loop::{MultiBufferServicingLoop, SubscriberId};
pub use tick::{TickClock, TickCommand};

use crate::error::ConduitError;
use crate::scope::ScopedAttributes;
use serde_json::Value;

/// The result of dispatching `Command::Invoke` against a `Runnable`.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// A JSON-representable value, returned to the caller directly.
    Primitive(Value),
    /// A non-primitive result the worker has cached under this handle id
    /// (see `RunnableBase::cache_handle`), for a later `Invoke` to be
    /// dispatched against it instead of re-sending the whole value.
    CachedHandle(u64),
}

impl InvokeOutcome {
    /// The JSON value reported on the status channel: the primitive
    /// itself, or a small envelope naming the cached handle.
    pub fn into_value(self) -> Value {
        match self {
            InvokeOutcome::Primitive(value) => value,
            InvokeOutcome::CachedHandle(handle) => serde_json::json!({ "handle": handle }),
        }
    }
}

/// Work that runs inside a `Runner`'s worker scope (a thread or a process).
///
/// `ScopedAttributes` is a supertrait rather than a bound added at each use
/// site: every `Runnable` has *some* scope policy, even if it is the
/// default empty one.
pub trait Runnable: ScopedAttributes + Send + 'static {
    /// Human-readable name, used in every diagnostic a `Runner` produces
    /// about this worker.
    fn name(&self) -> &str;

    /// Runs inside the worker scope. A Runnable with no servicing loop
    /// (one that does a single unit of work and returns) is legal — the
    /// loop is a tool `execute()` reaches for, not a requirement `Runner`
    /// imposes.
    fn execute(&mut self) -> Result<(), ConduitError>;

    /// Dispatch a method invoked from outside this Runnable's scope via
    /// `Command::Invoke`. The default rejects every method name: a
    /// Runnable opts in by overriding this.
    fn invoke(&mut self, method: &str, args: Value) -> Result<InvokeOutcome, ConduitError> {
        let _ = args;
        Err(ConduitError::Invalid(format!(
            "'{method}' is not invokable on this runnable"
        )))
    }
}
