// SPDX-License-Identifier: GPL-3.0-or-later

//! The single binary every cross-process scenario re-execs into.
//!
//! `conduit_ipc::run_if_child` never returns when `CONDUIT_RENDEZVOUS` is
//! set, so this binary has no other entry point: the parent test process
//! decides which role a child plays through `CONDUIT_TEST_ROLE` and hands it
//! the addresses of the cross-process buffers it should connect to.

use anyhow::{bail, Result};
use conduit_core::buffer::{Buffer, Observable, Publishable};
use conduit_core::command::Command;
use conduit_core::error::ConduitError;
use conduit_core::event::Event;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::runnable::{MultiBufferServicingLoop, OutputSlot, Runnable, RunnableBase, SubscriberId};
use conduit_core::scope::ScopedAttributes;
use conduit_core::status::StatusPublisher;
use conduit_core::timeout::Timeout;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CALL_TIMEOUT: Timeout = Timeout::After(Duration::from_secs(5));

/// Emits `0..count`, raising at `error_at` if one is given instead of
/// running to completion cleanly.
struct SequenceSource {
    base: RunnableBase<()>,
    output: OutputSlot<i32>,
    count: i32,
    error_at: Option<i32>,
}

impl ScopedAttributes for SequenceSource {}

impl Runnable for SequenceSource {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        self.output.bind()?;
        for i in 0..self.count {
            if self.error_at == Some(i) {
                let err = ConduitError::WorkerFailure(format!(
                    "Test Error (raised by sequence source at {}:{})",
                    file!(),
                    line!()
                ));
                self.output.publish_complete(Some(err.clone()), CALL_TIMEOUT, UnexpectedSituationPolicy::Raise)?;
                return Err(err);
            }
            self.output.publish_value(i, CALL_TIMEOUT, UnexpectedSituationPolicy::Raise)?;
        }
        self.output.publish_complete(None, CALL_TIMEOUT, UnexpectedSituationPolicy::Raise)?;
        Ok(())
    }
}

/// Relays every value and the terminal from one cross-process buffer to
/// another, unchanged. Grounded on `Multicaster::execute`'s single-output
/// case: the same lazy-bound, lock-shared `OutputSlot` the multicaster uses
/// for each of its subscribed outputs.
struct Forwarder {
    base: RunnableBase<()>,
    input: Buffer<i32>,
    output: Arc<Mutex<OutputSlot<i32>>>,
}

impl ScopedAttributes for Forwarder {}

impl Runnable for Forwarder {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).bind()?;

        let wake = Event::new();
        let command_subscription = self.base.command_buffer().subscribe(Some(wake.clone()))?;
        let input_subscription = self.input.subscribe(Some(wake.clone()))?;
        let mut loop_ = MultiBufferServicingLoop::new(command_subscription, wake);

        let name = self.base.name().to_string();
        let output_for_value = self.output.clone();
        let output_for_complete = self.output.clone();
        let output_for_ending = self.output.clone();

        loop_.add_input(
            input_subscription,
            SubscriberId(0),
            move |value: i32| {
                let mut output = output_for_value.lock().unwrap_or_else(|e| e.into_inner());
                let _ = output.publish_value(value, CALL_TIMEOUT, UnexpectedSituationPolicy::Raise);
            },
            move |err: Option<ConduitError>| -> Result<(), ConduitError> {
                let mut output = output_for_complete.lock().unwrap_or_else(|e| e.into_inner());
                match output.publish_complete(err.clone(), CALL_TIMEOUT, UnexpectedSituationPolicy::Raise) {
                    Ok(()) => Ok(()),
                    Err(raised) if err.is_some() => {
                        log::warn!("forwarder '{name}' could not deliver a terminal downstream: {raised}");
                        Ok(())
                    }
                    Err(raised) => Err(raised),
                }
            },
        );

        loop_.on_execution_ending(move |_err| {
            output_for_ending.lock().unwrap_or_else(|e| e.into_inner()).close();
            Ok(false)
        });

        loop_.run()
    }
}

/// Drains an input to nothing, surfacing whatever error the stream ended
/// with as its own `execute()` failure.
struct Sink {
    base: RunnableBase<()>,
    input: Buffer<i32>,
}

impl ScopedAttributes for Sink {}

impl Runnable for Sink {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        let wake = Event::new();
        let command_subscription = self.base.command_buffer().subscribe(Some(wake.clone()))?;
        let input_subscription = self.input.subscribe(Some(wake.clone()))?;
        let mut loop_ = MultiBufferServicingLoop::new(command_subscription, wake);

        loop_.add_input(
            input_subscription,
            SubscriberId(0),
            move |_value: i32| {},
            move |err: Option<ConduitError>| -> Result<(), ConduitError> {
                match err {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            },
        );

        loop_.run()
    }
}

enum RoleRunnable {
    Source(SequenceSource),
    Forward(Forwarder),
    Sink(Sink),
}

impl ScopedAttributes for RoleRunnable {}

impl Runnable for RoleRunnable {
    fn name(&self) -> &str {
        match self {
            RoleRunnable::Source(r) => r.name(),
            RoleRunnable::Forward(r) => r.name(),
            RoleRunnable::Sink(r) => r.name(),
        }
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        match self {
            RoleRunnable::Source(r) => r.execute(),
            RoleRunnable::Forward(r) => r.execute(),
            RoleRunnable::Sink(r) => r.execute(),
        }
    }
}

fn env_var(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("{key} must be set for the conduit test worker"))
}

fn env_addr(key: &str) -> SocketAddr {
    env_var(key)
        .parse()
        .unwrap_or_else(|e| panic!("{key} is not a valid socket address: {e}"))
}

fn build(command_buffer: Buffer<Command>, status: StatusPublisher<()>) -> RoleRunnable {
    let role = env_var("CONDUIT_TEST_ROLE");
    let name = format!("conduit-test-worker-{role}");
    match role.as_str() {
        "source" => {
            let output_addr = env_addr("CONDUIT_TEST_OUTPUT_ADDR");
            let count: i32 = env_var("CONDUIT_TEST_COUNT")
                .parse()
                .expect("CONDUIT_TEST_COUNT must be an integer");
            let error_at = std::env::var("CONDUIT_TEST_ERROR_AT")
                .ok()
                .map(|v| v.parse().expect("CONDUIT_TEST_ERROR_AT must be an integer"));
            let output = conduit_ipc::connect::<i32>("source-out", output_addr, 10);
            RoleRunnable::Source(SequenceSource {
                base: RunnableBase::new(name, status, command_buffer),
                output: OutputSlot::new(output),
                count,
                error_at,
            })
        }
        "forward" => {
            let input_addr = env_addr("CONDUIT_TEST_INPUT_ADDR");
            let output_addr = env_addr("CONDUIT_TEST_OUTPUT_ADDR");
            let input = conduit_ipc::connect::<i32>("forward-in", input_addr, 10);
            let output = conduit_ipc::connect::<i32>("forward-out", output_addr, 10);
            RoleRunnable::Forward(Forwarder {
                base: RunnableBase::new(name, status, command_buffer),
                input,
                output: Arc::new(Mutex::new(OutputSlot::new(output))),
            })
        }
        "sink" => {
            let input_addr = env_addr("CONDUIT_TEST_INPUT_ADDR");
            let input = conduit_ipc::connect::<i32>("sink-in", input_addr, 10);
            RoleRunnable::Sink(Sink {
                base: RunnableBase::new(name, status, command_buffer),
                input,
            })
        }
        other => panic!("unknown CONDUIT_TEST_ROLE '{other}'"),
    }
}

/// Driver function of the worker binary.
///
/// `run_if_child` never returns when this process was re-exec'd with
/// `CONDUIT_RENDEZVOUS` set — it runs the role to completion and exits the
/// process itself. This binary has no other purpose, so reaching the line
/// after the call means it was launched directly instead of through a
/// `ProcessRunner`, which is this binary's one reportable error.
fn main() -> Result<()> {
    env_logger::init();
    conduit_ipc::run_if_child::<RoleRunnable, ()>(build);
    bail!("conduit-test-worker must be re-exec'd by a ProcessRunner (CONDUIT_RENDEZVOUS was not set)");
}
