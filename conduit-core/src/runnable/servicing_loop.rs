// SPDX-License-Identifier: GPL-3.0-or-later

//! The central algorithmic core: a single loop that drains a fixed set of
//! input buffers (each paired with a subscriber callback), a command
//! channel, and an optional tick clock, and guarantees every subscriber
//! sees exactly one terminal notification no matter how the loop exits.
//!
//! Every clause below is traced in `DESIGN.md` to the completion-drain
//! algorithm this is built from; this is the one module in the crate where
//! a plausible-looking but subtly wrong reading of the source would be
//! easy to introduce, so nothing here is improvised.

use super::tick::TickClock;
use crate::buffer::SubscriptionSession;
use crate::command::Command;
use crate::error::ConduitError;
use crate::event::Event;
use crate::item::Item;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

/// Identifies which logical subscriber an input is paired with. Several
/// inputs may share one id: the loop delivers at most one `on_complete` per
/// id, the first time any of its inputs reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub usize);

type ValueHandler = Box<dyn FnMut(Box<dyn Any + Send>) + Send>;
type CompleteHandler = Box<dyn FnMut(Option<ConduitError>) -> Result<(), ConduitError> + Send>;

trait ErasedSubscription: Send {
    fn poll(&mut self) -> Result<ErasedPoll, ConduitError>;
}

enum ErasedPoll {
    Value(Box<dyn Any + Send>),
    Complete(Option<ConduitError>),
}

struct TypedSubscription<T> {
    session: SubscriptionSession<T>,
}

impl<T: Send + 'static> ErasedSubscription for TypedSubscription<T> {
    fn poll(&mut self) -> Result<ErasedPoll, ConduitError> {
        let mut outcome = None;
        self.session.call_events(|item| {
            outcome = Some(match item {
                Item::Value(value) => ErasedPoll::Value(Box::new(value)),
                Item::Complete(err) => ErasedPoll::Complete(err),
            });
        })?;
        Ok(outcome.expect("call_events only invokes the handler when it returns Ok"))
    }
}

struct InputSlot {
    subscription: Box<dyn ErasedSubscription>,
    on_value: ValueHandler,
    on_complete: CompleteHandler,
    subscriber_id: SubscriberId,
    done: bool,
}

/// Builds and drives a `Runnable`'s event loop over its inputs, its tick
/// clock, and its own command channel.
///
/// A `Runnable`'s `execute()` constructs one of these (registering its
/// inputs, command subscription, and optional tick clock), then calls
/// `run()`, which does not return until `should_continue()` is false or an
/// unrecoverable error has been through the completion-drain algorithm.
pub struct MultiBufferServicingLoop {
    inputs: Vec<InputSlot>,
    subscriber_done: HashMap<usize, bool>,
    command_subscription: SubscriptionSession<Command>,
    wake: Event,
    tick: TickClock,
    stopping: bool,
    on_tick: Box<dyn FnMut(Instant) + Send>,
    on_invoke: Box<dyn FnMut(&str, Value) -> Result<Value, ConduitError> + Send>,
    publish_invoke_result: Box<dyn FnMut(u64, Result<Value, ConduitError>) + Send>,
    execution_ending_hook: Box<dyn FnMut(Option<ConduitError>) -> Result<bool, ConduitError> + Send>,
}

impl MultiBufferServicingLoop {
    /// `command_subscription` and every input's subscription must already
    /// share the same wake `event` (the servicing loop does not set it up
    /// for you — `Runner::start` binds it once, the same event, to every
    /// `subscribe()` call it makes on the worker's behalf).
    pub fn new(command_subscription: SubscriptionSession<Command>, wake: Event) -> Self {
        MultiBufferServicingLoop {
            inputs: Vec::new(),
            subscriber_done: HashMap::new(),
            command_subscription,
            wake,
            tick: TickClock::new(),
            stopping: false,
            on_tick: Box::new(|_| {}),
            on_invoke: Box::new(|method, _| {
                Err(ConduitError::Invalid(format!(
                    "'{method}' is not invokable on this runnable"
                )))
            }),
            publish_invoke_result: Box::new(|_, _| {}),
            execution_ending_hook: Box::new(|_| Ok(false)),
        }
    }

    /// Register one `(input, subscriber)` pair. `on_value`/`on_complete`
    /// are typically closures capturing `&mut` state the `Runnable` owns
    /// (an `OutputSlot`, an accumulator, ...).
    pub fn add_input<T: Send + 'static>(
        &mut self,
        subscription: SubscriptionSession<T>,
        subscriber_id: SubscriberId,
        mut on_value: impl FnMut(T) + Send + 'static,
        on_complete: impl FnMut(Option<ConduitError>) -> Result<(), ConduitError> + Send + 'static,
    ) {
        let on_value: ValueHandler = Box::new(move |boxed| {
            let value = *boxed
                .downcast::<T>()
                .expect("add_input's value handler only ever receives its own T");
            on_value(value);
        });
        self.inputs.push(InputSlot {
            subscription: Box::new(TypedSubscription { session: subscription }),
            on_value,
            on_complete: Box::new(on_complete),
            subscriber_id,
            done: false,
        });
    }

    /// Install the tick handler, called whenever `TickClock::fire_if_due`
    /// fires. Ticking stays dormant until the `Runnable` sends itself a
    /// `Command::Tick(TickCommand::SetInterval(_))`.
    pub fn on_tick(&mut self, handler: impl FnMut(Instant) + Send + 'static) {
        self.on_tick = Box::new(handler);
    }

    /// Install the invoke dispatcher, normally `Runnable::invoke` bound to
    /// `&mut self`.
    pub fn on_invoke(
        &mut self,
        handler: impl FnMut(&str, Value) -> Result<Value, ConduitError> + Send + 'static,
    ) {
        self.on_invoke = Box::new(handler);
    }

    /// Install the status-channel sink for invoke results.
    pub fn on_invoke_result(&mut self, handler: impl FnMut(u64, Result<Value, ConduitError>) + Send + 'static) {
        self.publish_invoke_result = Box::new(handler);
    }

    /// Install the `execution_ending_hook` the completion-drain algorithm
    /// calls after every subscriber has been notified — `Multicaster` uses
    /// this to close its own output sessions; the default does nothing and
    /// reports "not handled".
    pub fn on_execution_ending(
        &mut self,
        hook: impl FnMut(Option<ConduitError>) -> Result<bool, ConduitError> + Send + 'static,
    ) {
        self.execution_ending_hook = Box::new(hook);
    }

    /// Run the loop to completion: drive inputs/ticks/commands until every
    /// input is done or a command stops it, then drain outstanding
    /// completions.
    pub fn run(mut self) -> Result<(), ConduitError> {
        let outcome = self.drive();
        let error = outcome.err();
        self.completion_drain(error)
    }

    fn should_continue(&self) -> bool {
        if self.stopping {
            return false;
        }
        !self.inputs.iter().all(|slot| slot.done)
    }

    fn drive(&mut self) -> Result<(), ConduitError> {
        loop {
            if !self.should_continue() {
                return Ok(());
            }
            let timeout = self.tick.remaining_until_due(Instant::now());
            self.wake.wait(timeout);
            if let Some(now) = self.tick.fire_if_due(Instant::now()) {
                (self.on_tick)(now);
            }
            self.drain_commands()?;
            self.drain_inputs()?;
        }
    }

    fn drain_commands(&mut self) -> Result<(), ConduitError> {
        loop {
            let mut received = None;
            match self.command_subscription.call_events(|item| {
                if let Item::Value(command) = item {
                    received = Some(command);
                }
            }) {
                Ok(()) => {}
                Err(ConduitError::Empty { .. }) => return Ok(()),
                Err(e) => return Err(e),
            }
            if let Some(command) = received {
                self.handle_command(command)?;
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<(), ConduitError> {
        match command {
            Command::Stop => {
                self.stopping = true;
                Ok(())
            }
            Command::Tick(tick_command) => {
                self.tick.apply(tick_command, Instant::now());
                Ok(())
            }
            Command::Invoke {
                call_id,
                method,
                args,
            } => {
                let result = (self.on_invoke)(&method, args);
                (self.publish_invoke_result)(call_id, result);
                Ok(())
            }
        }
    }

    /// Within one wake, each input is drained until empty or until
    /// `should_continue()` becomes false, in declaration order.
    fn drain_inputs(&mut self) -> Result<(), ConduitError> {
        for index in 0..self.inputs.len() {
            loop {
                if !self.should_continue() {
                    return Ok(());
                }
                if self.inputs[index].done {
                    break;
                }
                match self.inputs[index].subscription.poll() {
                    Ok(ErasedPoll::Value(value)) => {
                        (self.inputs[index].on_value)(value);
                    }
                    Ok(ErasedPoll::Complete(err)) => {
                        self.inputs[index].done = true;
                        if let Some(err) = err {
                            return Err(err);
                        }
                        self.deliver_completion_once(index, None)?;
                        break;
                    }
                    Err(ConduitError::Empty { .. }) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn deliver_completion_once(
        &mut self,
        index: usize,
        err: Option<ConduitError>,
    ) -> Result<(), ConduitError> {
        let id = self.inputs[index].subscriber_id.0;
        if *self.subscriber_done.get(&id).unwrap_or(&false) {
            return Ok(());
        }
        self.subscriber_done.insert(id, true);
        (self.inputs[index].on_complete)(err)
    }

    /// The completion-drain algorithm, run once after the main loop exits
    /// for any reason. Guarantees every subscriber not already marked done
    /// receives exactly one terminal notification.
    fn completion_drain(&mut self, x: Option<ConduitError>) -> Result<(), ConduitError> {
        let mut current_error = x;
        let mut error_delivered_to_any = false;
        let mut visited_ids: Vec<usize> = Vec::new();

        for index in 0..self.inputs.len() {
            let id = self.inputs[index].subscriber_id.0;
            let already_done = *self.subscriber_done.get(&id).unwrap_or(&false);
            if already_done || visited_ids.contains(&id) {
                continue;
            }
            visited_ids.push(id);
            match (self.inputs[index].on_complete)(current_error.clone()) {
                Ok(()) => {
                    if current_error.is_some() {
                        error_delivered_to_any = true;
                    }
                }
                Err(raised) => adopt_or_log(&mut current_error, raised),
            }
            self.subscriber_done.insert(id, true);
        }

        let hook_handled = match (self.execution_ending_hook)(current_error.clone()) {
            Ok(handled) => handled,
            Err(raised) => {
                adopt_or_log(&mut current_error, raised);
                false
            }
        };

        match current_error {
            Some(err) if !error_delivered_to_any && !hook_handled => Err(err),
            _ => Ok(()),
        }
    }
}

/// Shared "adopt Y as the running error unless it's the same as X, in which
/// case keep going with X; if it's a third, different error, log and keep
/// going with X" rule used twice in the drain algorithm.
fn adopt_or_log(current: &mut Option<ConduitError>, raised: ConduitError) {
    match current {
        None => *current = Some(raised),
        Some(existing) if *existing == raised => {}
        Some(_existing) => {
            log::warn!("shutdown drain raised a second, different error: {raised}");
        }
    }
}
