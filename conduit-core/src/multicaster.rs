// SPDX-License-Identifier: GPL-3.0-or-later

//! A fan-out `Runnable`: copies every item from one input buffer to N
//! subscribed output buffers, each carrying its own overflow policy.
//!
//! Grounded on `puma.multicaster.multicaster.Multicaster` and its
//! `_multicaster_subscriber` helper: a per-output policy dictionary guarded
//! by a lock, `NO_WAIT` used for every push, and — the subtle part — a
//! distinction in how a full output is treated when delivering the
//! terminal: if the input already ended with an error, a further
//! full-buffer-under-raise on an output is logged and the worker still
//! exits cleanly; if the input ended cleanly, that same failure is the
//! *only* error anyone will ever see for the stream, so it escalates.

use crate::buffer::{Buffer, Observable, Publishable};
use crate::command::Command;
use crate::error::ConduitError;
use crate::event::Event;
use crate::policy::UnexpectedSituationPolicy;
use crate::runnable::{MultiBufferServicingLoop, OutputSlot, Runnable, RunnableBase, SubscriberId};
use crate::scope::ScopedAttributes;
use crate::status::StatusPublisher;
use crate::timeout::Timeout;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a just-overflowed output is given to drain enough to accept its
/// synthesized terminal before the attempt is abandoned. Short enough not to
/// stall the fan-out loop over one slow consumer, long enough for a genuine
/// "slow, not stalled" consumer to catch up.
const OVERFLOW_COMPLETION_GRACE: Duration = Duration::from_millis(200);

struct OutputEntry<T> {
    slot: OutputSlot<T>,
    policy: UnexpectedSituationPolicy,
    /// Set once this output has received its terminal (normally or via a
    /// forced `Complete(Full)`); further value pushes to it are skipped.
    done: bool,
}

/// A `Runnable` whose single input is fanned out to every currently
/// subscribed output.
///
/// `subscribe`/`unsubscribe` are only legal before `start()`; the
/// `Multicaster` itself — not `RunnableBase` — enforces that: both calls
/// fail with *executing* once the worker loop is running.
pub struct Multicaster<T> {
    base: RunnableBase<()>,
    input: Buffer<T>,
    outputs: Arc<Mutex<Vec<OutputEntry<T>>>>,
    executing: Arc<Mutex<bool>>,
}

impl<T> ScopedAttributes for Multicaster<T> {}

impl<T: Send + Clone + 'static> Multicaster<T> {
    /// `status`/`command_buffer` are the handles `ThreadRunner::channels`
    /// (or the process-runner equivalent) hands back before the Multicaster
    /// is wrapped by its `Runner`.
    pub fn new(name: impl Into<String>, input: Buffer<T>, status: StatusPublisher<()>, command_buffer: Buffer<Command>) -> Self {
        Multicaster {
            base: RunnableBase::new(name, status, command_buffer),
            input,
            outputs: Arc::new(Mutex::new(Vec::new())),
            executing: Arc::new(Mutex::new(false)),
        }
    }

    fn reject_if_executing(&self) -> Result<(), ConduitError> {
        if *self.executing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(ConduitError::Invalid(format!(
                "multicaster '{}' is executing",
                self.base.name()
            )));
        }
        Ok(())
    }

    /// Subscribe a new output, fanned out to from here on with `policy`
    /// governing what happens when it is full.
    pub fn subscribe(&self, output: Buffer<T>, policy: UnexpectedSituationPolicy) -> Result<(), ConduitError> {
        self.reject_if_executing()?;
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.push(OutputEntry {
            slot: OutputSlot::new(output),
            policy,
            done: false,
        });
        Ok(())
    }

    /// Detach a previously subscribed output, matched by buffer identity.
    pub fn unsubscribe(&self, output: &Buffer<T>) -> Result<(), ConduitError> {
        self.reject_if_executing()?;
        let target = output.identity();
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.retain(|entry| entry.slot.buffer().identity() != target);
        Ok(())
    }

    /// How many outputs are currently subscribed.
    pub fn output_count(&self) -> usize {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<T: Send + Clone + 'static> Runnable for Multicaster<T> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        *self.executing.lock().unwrap_or_else(|e| e.into_inner()) = true;

        {
            let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
            for entry in outputs.iter_mut() {
                entry.slot.bind()?;
            }
        }

        let wake = Event::new();
        let command_subscription = self.base.command_buffer().subscribe(Some(wake.clone()))?;
        let input_subscription = self.input.subscribe(Some(wake.clone()))?;
        let mut loop_ = MultiBufferServicingLoop::new(command_subscription, wake);

        let name = self.base.name().to_string();
        let outputs_for_value = self.outputs.clone();
        let outputs_for_complete = self.outputs.clone();
        let outputs_for_ending = self.outputs.clone();

        loop_.add_input(
            input_subscription,
            SubscriberId(0),
            move |value: T| {
                let mut outputs = outputs_for_value.lock().unwrap_or_else(|e| e.into_inner());
                for entry in outputs.iter_mut() {
                    if entry.done {
                        continue;
                    }
                    if let Err(err) = entry.slot.publish_value(value.clone(), Timeout::NoWait, entry.policy) {
                        entry.done = true;
                        let _ = entry.slot.publish_complete(
                            Some(err),
                            Timeout::After(OVERFLOW_COMPLETION_GRACE),
                            UnexpectedSituationPolicy::Ignore,
                        );
                    }
                }
            },
            move |err: Option<ConduitError>| -> Result<(), ConduitError> {
                let mut outputs = outputs_for_complete.lock().unwrap_or_else(|e| e.into_inner());
                let mut escalate: Option<ConduitError> = None;
                for entry in outputs.iter_mut() {
                    if entry.done {
                        continue;
                    }
                    match entry.slot.publish_complete(err.clone(), Timeout::NoWait, entry.policy) {
                        Ok(()) => entry.done = true,
                        Err(raised) => {
                            entry.done = true;
                            if err.is_some() {
                                log::warn!(
                                    "multicaster '{name}' could not deliver a terminal to a full output: {raised}"
                                );
                            } else {
                                match &escalate {
                                    None => escalate = Some(raised),
                                    Some(existing) if *existing == raised => {}
                                    Some(_) => log::warn!(
                                        "multicaster '{name}' lost a second, distinct completion error: {raised}"
                                    ),
                                }
                            }
                        }
                    }
                }
                match escalate {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            },
        );

        loop_.on_execution_ending(move |_err| {
            let mut outputs = outputs_for_ending.lock().unwrap_or_else(|e| e.into_inner());
            for entry in outputs.iter_mut() {
                entry.slot.close();
            }
            Ok(false)
        });

        loop_.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ThreadBuffer;
    use crate::runner::{RunnerControl, ThreadRunner};
    use crate::timeout::Timeout as T;
    use std::time::Duration;

    fn new_multicaster(input: Buffer<i32>) -> (Multicaster<i32>, Buffer<Command>, StatusPublisher<()>, crate::status::StatusSubscription<()>) {
        let (command_buffer, status_publisher, status_subscription) = ThreadRunner::<Multicaster<i32>, ()>::channels("mc");
        let multicaster = Multicaster::new("mc", input, status_publisher.clone(), command_buffer.clone());
        (multicaster, command_buffer, status_publisher, status_subscription)
    }

    #[test]
    fn fans_every_value_out_to_every_subscribed_output() {
        let input: Buffer<i32> = ThreadBuffer::new("mc-in", 10, false);
        let (multicaster, command_buffer, status_publisher, status_subscription) = new_multicaster(input.clone());
        let out_a: Buffer<i32> = ThreadBuffer::new("out-a", 10, false);
        let out_b: Buffer<i32> = ThreadBuffer::new("out-b", 10, false);
        multicaster
            .subscribe(out_a.clone(), UnexpectedSituationPolicy::Raise)
            .unwrap();
        multicaster
            .subscribe(out_b.clone(), UnexpectedSituationPolicy::Raise)
            .unwrap();

        let mut sub_a = out_a.subscribe(None).unwrap();
        let mut sub_b = out_b.subscribe(None).unwrap();

        let mut runner = ThreadRunner::new("mc", multicaster, command_buffer, status_publisher, status_subscription);
        runner.start_blocking(Some(Duration::from_secs(1))).unwrap();

        let mut publisher = input.publish().unwrap();
        publisher.publish_value(1, T::NoWait, UnexpectedSituationPolicy::Raise).unwrap();
        publisher.publish_complete(None, T::NoWait, UnexpectedSituationPolicy::Raise).unwrap();

        runner.exit().unwrap();

        let mut seen_a = Vec::new();
        sub_a.call_events(|item| seen_a.push(item)).unwrap();
        sub_a.call_events(|item| seen_a.push(item)).unwrap();
        assert_eq!(seen_a[0].clone().value(), Some(1));
        assert!(seen_a[1].is_complete());

        let mut seen_b = Vec::new();
        sub_b.call_events(|item| seen_b.push(item)).unwrap();
        sub_b.call_events(|item| seen_b.push(item)).unwrap();
        assert_eq!(seen_b[0].clone().value(), Some(1));
        assert!(seen_b[1].is_complete());
    }

    #[test]
    fn subscribe_after_execute_has_run_is_rejected() {
        let input: Buffer<i32> = ThreadBuffer::new("mc-in2", 10, false);
        let (mut multicaster, _command_buffer, _status_publisher, _status_subscription) = new_multicaster(input.clone());
        let mut publisher = input.publish().unwrap();
        publisher
            .publish_complete(None, T::NoWait, UnexpectedSituationPolicy::Raise)
            .unwrap();
        multicaster.execute().unwrap();

        let out: Buffer<i32> = ThreadBuffer::new("out", 10, false);
        let result = multicaster.subscribe(out, UnexpectedSituationPolicy::Raise);
        assert!(matches!(result, Err(ConduitError::Invalid(_))));
    }
}
