// SPDX-License-Identifier: GPL-3.0-or-later

//! Plumbing shared by every `Runnable`: lazy output-publisher binding,
//! self-command sending, and the invoke-result cache.

use crate::buffer::{Buffer, Publishable, PublisherSession};
use crate::command::Command;
use crate::error::ConduitError;
use crate::policy::UnexpectedSituationPolicy;
use crate::status::StatusPublisher;
use crate::timeout::Timeout;
use std::any::Any;
use std::collections::HashMap;

/// One declared output of a `Runnable`.
///
/// Constructed in the parent scope from just a `Buffer<T>` handle; the real
/// publisher session is opened lazily, once `execute()` starts in the
/// worker scope, by calling `bind()`. Using the slot before `bind()` (a
/// construction-time mistake, not a runtime race — `bind()` is always the
/// first thing `execute()` does) fails loudly rather than silently
/// swallowing the item.
pub struct OutputSlot<T> {
    buffer: Buffer<T>,
    session: Option<PublisherSession<T>>,
}

impl<T> OutputSlot<T> {
    /// Declare an output without yet opening a publisher session on it.
    pub fn new(buffer: Buffer<T>) -> Self {
        OutputSlot {
            buffer,
            session: None,
        }
    }

    /// The declared buffer, independent of whether a session is bound —
    /// used by `Multicaster` to `subscribe()` additional consumers before
    /// `start`.
    pub fn buffer(&self) -> &Buffer<T> {
        &self.buffer
    }

    /// Open the real publisher session. Called once, at the start of
    /// `execute()`.
    pub fn bind(&mut self) -> Result<(), ConduitError> {
        self.session = Some(self.buffer.publish()?);
        Ok(())
    }

    /// The bound session, or `ConduitError::Invalid` if `bind()` has not
    /// run yet.
    pub fn session_mut(&mut self) -> Result<&mut PublisherSession<T>, ConduitError> {
        self.session.as_mut().ok_or_else(|| {
            ConduitError::Invalid(format!(
                "output '{}' was used before the worker scope bound it",
                self.buffer.name()
            ))
        })
    }

    /// Push a value through this output, applying `policy` on overflow.
    pub fn publish_value(
        &mut self,
        value: T,
        timeout: Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        self.session_mut()?.publish_value(value, timeout, policy)
    }

    /// Publish the terminal marker, if this session hasn't already sent
    /// one.
    pub fn publish_complete(
        &mut self,
        err: Option<ConduitError>,
        timeout: Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        if self
            .session
            .as_ref()
            .is_some_and(PublisherSession::has_published_complete)
        {
            return Ok(());
        }
        self.session_mut()?.publish_complete(err, timeout, policy)
    }

    /// Close the session (unpublish), done on worker exit.
    pub fn close(&mut self) {
        self.session = None;
    }
}

/// Shared state every `Runnable` implementation is expected to embed: its
/// own command/status channel handles, kept here rather than threaded
/// through every method call by hand.
pub struct RunnableBase<S> {
    name: String,
    status: StatusPublisher<S>,
    command_buffer: Buffer<Command>,
    self_command_session: Option<PublisherSession<Command>>,
    cache: HashMap<u64, Box<dyn Any + Send>>,
    next_handle_id: u64,
}

impl<S> RunnableBase<S> {
    /// `command_buffer` is the same buffer the `Runner` gave the worker a
    /// subscription to; self-sends reuse it rather than opening a second,
    /// parallel channel.
    pub fn new(name: impl Into<String>, status: StatusPublisher<S>, command_buffer: Buffer<Command>) -> Self {
        RunnableBase {
            name: name.into(),
            status,
            command_buffer,
            self_command_session: None,
            cache: HashMap::new(),
            next_handle_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &StatusPublisher<S> {
        &self.status
    }

    /// The buffer the `Runner` feeds commands into. A `Runnable` that
    /// builds its own `MultiBufferServicingLoop` subscribes to this at the
    /// start of `execute()` to get the loop's command subscription.
    pub fn command_buffer(&self) -> &Buffer<Command> {
        &self.command_buffer
    }

    /// Send a command to this runnable's own command channel from within
    /// its own worker scope — e.g. a Runnable that decides mid-`execute()`
    /// that it should stop. The publisher session is opened on first use.
    pub fn send_self(&mut self, command: Command, timeout: Timeout) -> Result<(), ConduitError> {
        if self.self_command_session.is_none() {
            self.self_command_session = Some(self.command_buffer.publish()?);
        }
        self.self_command_session
            .as_mut()
            .expect("just bound above")
            .publish_value(command, timeout, UnexpectedSituationPolicy::Raise)
    }

    /// Cache a non-primitive invoke result under a freshly minted handle
    /// id, for `InvokeOutcome::CachedHandle`.
    pub fn cache_handle(&mut self, value: Box<dyn Any + Send>) -> u64 {
        let id = self.next_handle_id;
        self.next_handle_id += 1;
        self.cache.insert(id, value);
        id
    }

    /// Look up a value cached by an earlier invoke, for a subsequent
    /// invoke dispatched against the handle it returned.
    pub fn cached(&self, handle: u64) -> Option<&(dyn Any + Send)> {
        self.cache.get(&handle).map(|boxed| boxed.as_ref())
    }

    pub fn cached_mut(&mut self, handle: u64) -> Option<&mut (dyn Any + Send)> {
        self.cache.get_mut(&handle).map(|boxed| boxed.as_mut())
    }
}
