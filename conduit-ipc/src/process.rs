// SPDX-License-Identifier: GPL-3.0-or-later

//! The process-scoped `Runner`: supervises a `Runnable` in a child process
//! of the current one, reached through the cross-process command and
//! status channels this module builds.
//!
//! A `Runnable` value cannot itself cross an `exec`: there is no channel a
//! Rust process can send an arbitrary closure or trait object through to a
//! freshly started process the way a thread spawn can. So the child does
//! not receive a constructed `Runnable` — it receives just enough
//! information to reconnect to the channels the parent already hosts
//! (`RendezvousInfo`) and reconstructs its own `Runnable` locally, the same
//! binary running in a different role. This is the re-exec-self pattern
//! the teacher's own preload interception already relies on: compare
//! `PreloadState`, a JSON blob handed to a child process through an
//! environment variable so it can report back to the address the parent
//! chose, here generalized from "one destination address" to "a command
//! address to read from and a status address to write to".

use crate::buffer::{connect, host};
use crate::status::{connect_status_publisher, forward_local_status, host_status_channel, IpcStatusSubscription};
use conduit_core::buffer::{Buffer, Publishable, PublisherSession};
use conduit_core::command::Command;
use conduit_core::error::ConduitError;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::runnable::Runnable;
use conduit_core::runner::{RunnerControl, DEFAULT_COMMAND_BUFFER_CAPACITY, DEFAULT_COMMAND_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT};
use conduit_core::status::{status_channel, Status};
use conduit_core::timeout::Timeout;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command as OsCommand};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// The environment variable a re-exec'd child looks for. Its value is a
/// JSON-encoded `RendezvousInfo`.
pub const RENDEZVOUS_ENV_VAR: &str = "CONDUIT_RENDEZVOUS";

/// Everything a child process needs to reconnect to the channels its
/// parent already hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousInfo {
    pub command_address: SocketAddr,
    pub status_address: SocketAddr,
}

impl RendezvousInfo {
    fn to_env_value(&self) -> Result<String, ConduitError> {
        serde_json::to_string(self).map_err(|e| ConduitError::Invalid(e.to_string()))
    }

    fn from_env_value(value: &str) -> Result<Self, ConduitError> {
        serde_json::from_str(value).map_err(|e| ConduitError::Invalid(e.to_string()))
    }
}

/// Call at the very top of `main()`, before any other setup. If this
/// process was `exec`'d as a conduit worker (`CONDUIT_RENDEZVOUS` is set),
/// `build` constructs this process's `Runnable` from the reconnected
/// command buffer and status publisher, runs it to completion bracketed
/// with `Started`/`Complete` exactly like `ThreadRunner`'s worker thread
/// does, and the process exits — this call never returns. Otherwise it
/// returns immediately and `main()` continues as the parent.
pub fn run_if_child<R, S>(build: impl FnOnce(Buffer<Command>, conduit_core::status::StatusPublisher<S>) -> R)
where
    R: Runnable,
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Ok(raw) = std::env::var(RENDEZVOUS_ENV_VAR) else {
        return;
    };
    let info = match RendezvousInfo::from_env_value(&raw) {
        Ok(info) => info,
        Err(err) => {
            log::error!("malformed {RENDEZVOUS_ENV_VAR}: {err}");
            std::process::exit(1);
        }
    };

    let command_buffer: Buffer<Command> = connect("commands", info.command_address, DEFAULT_COMMAND_BUFFER_CAPACITY);
    let (status_publisher, status_subscription) = status_channel::<S>();
    let ipc_status = match connect_status_publisher::<S>("status", info.status_address) {
        Ok(publisher) => publisher,
        Err(err) => {
            log::error!("could not connect to parent status channel: {err}");
            std::process::exit(1);
        }
    };
    forward_local_status(status_subscription, ipc_status);

    let mut runnable = build(command_buffer, status_publisher.clone());
    status_publisher.publish(Status::Started);
    let outcome = match catch_unwind(AssertUnwindSafe(|| runnable.execute())) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(ConduitError::worker_failure(panic_message(&payload))),
    };
    status_publisher.publish(Status::Complete(outcome));
    // Best-effort: give the forwarder a moment to relay the terminal status
    // before this process disappears out from under it.
    thread::sleep(Duration::from_millis(200));
    std::process::exit(0);
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker process panicked with a non-string payload".to_string()
    }
}

/// Supervises a `Runnable` running in a child process, started by
/// re-executing `program` with `args` and `CONDUIT_RENDEZVOUS` set.
pub struct ProcessRunner<S> {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    rendezvous: RendezvousInfo,
    command_buffer: Buffer<Command>,
    command_publisher: Option<PublisherSession<Command>>,
    status_subscription: IpcStatusSubscription<S>,
    child: Option<Arc<Mutex<Child>>>,
    next_call_id: AtomicU64,
    error_reported: bool,
}

impl<S> ProcessRunner<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Host the command and status channels a child process will connect
    /// back to, and return the `RendezvousInfo` to hand it through
    /// `CONDUIT_RENDEZVOUS`.
    pub fn channels(name: impl Into<String>) -> Result<(RendezvousInfo, Buffer<Command>, IpcStatusSubscription<S>), ConduitError> {
        let name = name.into();
        let (command_buffer, command_address) = host::<Command>(format!("{name}-commands"), DEFAULT_COMMAND_BUFFER_CAPACITY, false)?;
        let (status_subscription, status_address) = host_status_channel::<S>(format!("{name}-status"))?;
        Ok((
            RendezvousInfo {
                command_address,
                status_address,
            },
            command_buffer,
            status_subscription,
        ))
    }

    /// Wrap the child-process command line with its supervisor. `program`
    /// is usually `std::env::current_exe()` — the same binary, re-exec'd —
    /// with `args` distinguishing which `Runnable` the child's own
    /// `run_if_child` call should build.
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        rendezvous: RendezvousInfo,
        command_buffer: Buffer<Command>,
        status_subscription: IpcStatusSubscription<S>,
    ) -> Self {
        ProcessRunner {
            name: name.into(),
            program: program.into(),
            args,
            rendezvous,
            command_buffer,
            command_publisher: None,
            status_subscription,
            child: None,
            next_call_id: AtomicU64::new(0),
            error_reported: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status_subscription(&self) -> &IpcStatusSubscription<S> {
        &self.status_subscription
    }

    fn send(&mut self, command: Command, timeout: Timeout) -> Result<(), ConduitError> {
        let publisher = self.command_publisher.as_mut().ok_or_else(|| {
            ConduitError::Invalid(format!("runner '{}' has not started", self.name))
        })?;
        publisher.publish_value(command, timeout, UnexpectedSituationPolicy::Raise)
    }
}

impl<S> RunnerControl<S> for ProcessRunner<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn start(&mut self) -> Result<(), ConduitError> {
        if self.child.is_some() {
            return Err(ConduitError::Invalid(format!(
                "runner '{}' has already started",
                self.name
            )));
        }
        let env_value = self.rendezvous.to_env_value()?;
        let child = OsCommand::new(&self.program)
            .args(&self.args)
            .env(RENDEZVOUS_ENV_VAR, env_value)
            .spawn()?;
        let child = Arc::new(Mutex::new(child));

        // Forward termination signals sent to this (parent) process on to
        // the child, the same shape as the teacher's own `supervise()`:
        // register the term signals against a flag, poll it, kill on
        // receipt. Unlike `supervise()` this runs in the background rather
        // than blocking the caller, since `ProcessRunner` exposes
        // `is_alive`/`join` for the caller to poll on its own terms.
        let signaled = Arc::new(AtomicUsize::new(0));
        for signal in signal_hook::consts::TERM_SIGNALS {
            let _ = signal_hook::flag::register_usize(*signal, signaled.clone(), *signal as usize);
        }
        let signal_child = child.clone();
        thread::spawn(move || loop {
            if signaled.swap(0, Ordering::SeqCst) != 0 {
                log::debug!("forwarding termination signal to child process");
                let mut guard = signal_child.lock().unwrap_or_else(|e| e.into_inner());
                let _ = guard.kill();
                return;
            }
            if matches!(signal_child.lock().unwrap_or_else(|e| e.into_inner()).try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        });

        self.command_publisher = Some(self.command_buffer.publish()?);
        self.child = Some(child);
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
        self.status_subscription.wait_for_invoke_result(call_id, timeout)?
    }

    fn is_alive(&self) -> bool {
        match &self.child {
            None => false,
            Some(child) => matches!(
                child.lock().unwrap_or_else(|e| e.into_inner()).try_wait(),
                Ok(None)
            ),
        }
    }

    fn join(&mut self, timeout: Timeout) -> Result<(), ConduitError> {
        let Some(child) = self.child.clone() else {
            return Ok(());
        };
        let deadline = timeout.deadline(Instant::now());
        loop {
            {
                let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
                match guard.try_wait() {
                    Ok(Some(_status)) => {
                        self.child = None;
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(err) => return Err(ConduitError::from(err)),
                }
            }
            let now = Instant::now();
            if deadline.expired(now) {
                return Err(ConduitError::StillAlive);
            }
            let step = match deadline.remaining(now) {
                None => Duration::from_millis(10),
                Some(remaining) => remaining.min(Duration::from_millis(10)),
            };
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

impl<S> Drop for ProcessRunner<S> {
    fn drop(&mut self) {
        if let Some(publisher) = self.command_publisher.as_mut() {
            let _ = publisher.publish_value(Command::Stop, Timeout::NoWait, UnexpectedSituationPolicy::Ignore);
        }
        if let Some(child) = self.child.take() {
            let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
            match guard.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = guard.kill();
                    let _ = guard.wait();
                }
            }
        }
    }
}
