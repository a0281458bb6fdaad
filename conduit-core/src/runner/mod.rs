// SPDX-License-Identifier: GPL-3.0-or-later

//! The thread-scoped `Runner`: supervises a `Runnable` on a plain
//! `std::thread`, wiring its command and status channels and bracketing
//! `execute()` with `Started`/`Complete`.
//!
//! `conduit-ipc` adds the process-scoped sibling on top of the same
//! `RunnerControl` trait, reusing the single-process buffer kind's command
//! channel wrapped here only for the thread case — the process variant
//! substitutes a cross-process buffer for the command/status channels it
//! owns.

use crate::buffer::{Buffer, Publishable, PublisherSession, ThreadBuffer};
use crate::command::Command;
use crate::error::ConduitError;
use crate::policy::UnexpectedSituationPolicy;
use crate::runnable::Runnable;
use crate::scope::{validate_scope_policy, RunnerKind};
use crate::status::{status_channel, Status, StatusPublisher, StatusSubscription};
use crate::timeout::Timeout;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default capacity for a `Runner`-owned command buffer — sized for small
/// command bursts without ever needing to grow.
pub const DEFAULT_COMMAND_BUFFER_CAPACITY: usize = 10;
/// Default bound on `exit()`'s join.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on a single `stop()`/`invoke()` send.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// The operations common to every `Runner` kind, thread or process.
///
/// `conduit-ipc::ProcessRunner` implements the same trait so calling code
/// can be written against `RunnerControl` and swap runner kinds without
/// touching anything but construction.
pub trait RunnerControl<S> {
    /// Launch the worker scope. Fails if already started, or if the
    /// Runnable's declared scope policy forbids this runner kind.
    fn start(&mut self) -> Result<(), ConduitError>;

    /// `start()` followed by a block until `Started` is observed.
    fn start_blocking(&mut self, timeout: Option<Duration>) -> Result<(), ConduitError>;

    /// Block until the worker has published `Status::Started`.
    fn wait_until_running(&self, timeout: Option<Duration>) -> Result<(), ConduitError>;

    /// Drain the status channel; raise the cached terminal error, if any,
    /// exactly once.
    fn check_for_exceptions(&mut self) -> Result<(), ConduitError>;

    /// Send `Command::Stop`.
    fn stop(&mut self) -> Result<(), ConduitError>;

    /// Send `Command::Invoke` and block for the matching `InvokeResult`.
    fn invoke(&mut self, method: &str, args: Value, timeout: Option<Duration>) -> Result<Value, ConduitError>;

    /// `true` while the worker scope has not yet reported completion.
    fn is_alive(&self) -> bool;

    /// Block until the worker scope ends, or `timeout` elapses.
    fn join(&mut self, timeout: Timeout) -> Result<(), ConduitError>;

    /// `stop()` (if alive), `join()` with the default shutdown timeout, then
    /// `check_for_exceptions()`.
    fn exit(&mut self) -> Result<(), ConduitError>;
}

/// Supervises a `Runnable` on a plain OS thread within the current process.
pub struct ThreadRunner<R: Runnable, S> {
    name: String,
    runnable: Option<R>,
    command_buffer: Buffer<Command>,
    command_publisher: Option<PublisherSession<Command>>,
    status_publisher: StatusPublisher<S>,
    status_subscription: StatusSubscription<S>,
    thread: Option<JoinHandle<()>>,
    next_call_id: AtomicU64,
    error_reported: bool,
}

impl<R: Runnable, S: Clone + Send + 'static> ThreadRunner<R, S> {
    /// Build the command buffer and status channel a `Runnable` needs to be
    /// constructed with, before it is handed to `ThreadRunner::new`.
    ///
    /// Mirrors the lazy-publisher pattern `OutputSlot` uses for a
    /// `Runnable`'s outputs: the Runnable only ever sees `Buffer<Command>`
    /// and `StatusPublisher<S>` handles; the real command *subscription* is
    /// opened inside the worker scope, the moment `execute()` starts.
    pub fn channels(name: impl Into<String>) -> (Buffer<Command>, StatusPublisher<S>, StatusSubscription<S>) {
        let name = name.into();
        let command_buffer = ThreadBuffer::new(format!("{name}-commands"), DEFAULT_COMMAND_BUFFER_CAPACITY, false);
        let (status_publisher, status_subscription) = status_channel();
        (command_buffer, status_publisher, status_subscription)
    }

    /// Wrap an already-built `Runnable` (constructed with the handles
    /// `channels()` returned) with its supervisor.
    pub fn new(
        name: impl Into<String>,
        runnable: R,
        command_buffer: Buffer<Command>,
        status_publisher: StatusPublisher<S>,
        status_subscription: StatusSubscription<S>,
    ) -> Self {
        ThreadRunner {
            name: name.into(),
            runnable: Some(runnable),
            command_buffer,
            command_publisher: None,
            status_publisher,
            status_subscription,
            thread: None,
            next_call_id: AtomicU64::new(0),
            error_reported: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status_subscription(&self) -> &StatusSubscription<S> {
        &self.status_subscription
    }

    fn send(&mut self, command: Command, timeout: Timeout) -> Result<(), ConduitError> {
        let publisher = self.command_publisher.as_mut().ok_or_else(|| {
            ConduitError::Invalid(format!("runner '{}' has not started", self.name))
        })?;
        publisher.publish_value(command, timeout, UnexpectedSituationPolicy::Raise)
    }
}

impl<R: Runnable, S: Clone + Send + 'static> RunnerControl<S> for ThreadRunner<R, S> {
    fn start(&mut self) -> Result<(), ConduitError> {
        if self.thread.is_some() {
            return Err(ConduitError::Invalid(format!(
                "runner '{}' has already started",
                self.name
            )));
        }
        validate_scope_policy(R::scope_policy(), RunnerKind::Thread)?;

        let mut runnable = self.runnable.take().ok_or_else(|| {
            ConduitError::Invalid(format!("runner '{}' has no runnable to start", self.name))
        })?;
        self.command_publisher = Some(self.command_buffer.publish()?);
        let status_publisher = self.status_publisher.clone();
        let name = self.name.clone();

        self.thread = Some(thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                status_publisher.publish(Status::Started);
                let outcome = match catch_unwind(AssertUnwindSafe(|| runnable.execute())) {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(ConduitError::worker_failure(panic_message(&payload))),
                };
                status_publisher.publish(Status::Complete(outcome));
            })
            .unwrap_or_else(|e| panic!("failed to spawn runner thread '{name}': {e}")));
        Ok(())
    }

    fn start_blocking(&mut self, timeout: Option<Duration>) -> Result<(), ConduitError> {
        self.start()?;
        self.wait_until_running(timeout)
    }

    fn wait_until_running(&self, timeout: Option<Duration>) -> Result<(), ConduitError> {
        self.status_subscription.wait_until_running(timeout)
    }

    fn check_for_exceptions(&mut self) -> Result<(), ConduitError> {
        if self.error_reported {
            return Ok(());
        }
        if let Some(Some(err)) = self.status_subscription.completion() {
            self.error_reported = true;
            return Err(err);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ConduitError> {
        self.send(Command::Stop, Timeout::After(DEFAULT_COMMAND_TIMEOUT))
    }

    fn invoke(&mut self, method: &str, args: Value, timeout: Option<Duration>) -> Result<Value, ConduitError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        self.send(
            Command::Invoke {
                call_id,
                method: method.to_string(),
                args,
            },
            Timeout::After(DEFAULT_COMMAND_TIMEOUT),
        )?;
        self.status_subscription
            .wait_for_invoke_result(call_id, timeout)?
    }

    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn join(&mut self, timeout: Timeout) -> Result<(), ConduitError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        let deadline = timeout.deadline(Instant::now());
        loop {
            if handle.is_finished() {
                handle
                    .join()
                    .map_err(|payload| ConduitError::worker_failure(panic_message(&payload)))?;
                return Ok(());
            }
            let now = Instant::now();
            if deadline.expired(now) {
                self.thread = Some(handle);
                return Err(ConduitError::StillAlive);
            }
            let step = deadline
                .remaining(now)
                .map_or(Duration::from_millis(10), |remaining| remaining.min(Duration::from_millis(10)));
            thread::sleep(step);
        }
    }

    fn exit(&mut self) -> Result<(), ConduitError> {
        if self.is_alive() {
            self.stop()?;
        }
        self.join(Timeout::After(DEFAULT_SHUTDOWN_TIMEOUT))?;
        self.check_for_exceptions()
    }
}

impl<R: Runnable, S> Drop for ThreadRunner<R, S> {
    fn drop(&mut self) {
        if let Some(publisher) = self.command_publisher.as_mut() {
            if self.thread.as_ref().is_some_and(|h| !h.is_finished()) {
                let _ = publisher.publish_value(Command::Stop, Timeout::NoWait, UnexpectedSituationPolicy::Ignore);
            }
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() && !thread::panicking() {
                log::warn!("runner '{}' worker thread panicked during drop", self.name);
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}
