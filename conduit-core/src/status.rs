// SPDX-License-Identifier: GPL-3.0-or-later

//! The status-plane counterpart to `Command`: messages a running `Runnable`
//! reports back to whoever started it.
//!
//! `StatusPublisher`/`StatusSubscription` are a deliberately smaller cousin
//! of `Buffer`: a status consumer only ever cares about the *latest* message
//! of each kind, not every one that was ever sent, so there is no queue,
//! capacity or overflow policy here — just one slot per kind, replaced on
//! write and paired with an `Event` so a waiter is woken promptly.

use crate::error::ConduitError;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A message a `Runnable` reports about its own lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Status<S> {
    /// The worker scope has been entered and the servicing loop is about to
    /// start. Published exactly once, before the first tick.
    Started,
    /// The servicing loop has exited. Carries an error if it exited because
    /// of one.
    Complete(Option<ConduitError>),
    /// An application-defined status value, opaque to the framework.
    Custom(S),
    /// The reply to a `Command::Invoke` with the matching `call_id`.
    InvokeResult {
        call_id: u64,
        result: Result<Value, ConduitError>,
    },
}

/// The "latest message of each kind" cache a status consumer reads against.
///
/// Pulled out from `StatusPublisher`/`StatusSubscription` so `conduit-ipc`'s
/// network-backed status channel can reuse the exact same update and query
/// semantics: its background relay thread calls `apply` as `Status<S>`
/// messages arrive off the wire, instead of `StatusPublisher::publish`
/// calling it directly in-process.
#[derive(Default)]
pub struct StatusCache<S> {
    started: bool,
    complete: Option<Option<ConduitError>>,
    custom: Option<S>,
    invoke_results: Vec<(u64, Result<Value, ConduitError>)>,
}

impl<S> StatusCache<S> {
    pub fn new() -> Self {
        StatusCache::default()
    }

    /// Record a status message, overwriting any previous message of the
    /// same kind.
    pub fn apply(&mut self, status: Status<S>) {
        match status {
            Status::Started => self.started = true,
            Status::Complete(err) => self.complete = Some(err),
            Status::Custom(value) => self.custom = Some(value),
            Status::InvokeResult { call_id, result } => {
                self.invoke_results.retain(|(id, _)| *id != call_id);
                self.invoke_results.push((call_id, result));
            }
        }
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn latest_custom(&self) -> Option<S>
    where
        S: Clone,
    {
        self.custom.clone()
    }

    pub fn completion(&self) -> Option<Option<ConduitError>>
    where
        S: Clone,
    {
        self.complete.clone()
    }

    pub fn take_invoke_result(&mut self, call_id: u64) -> Option<Result<Value, ConduitError>> {
        let index = self.invoke_results.iter().position(|(id, _)| *id == call_id)?;
        Some(self.invoke_results.remove(index).1)
    }

    pub fn has_invoke_result(&self, call_id: u64) -> bool {
        self.invoke_results.iter().any(|(id, _)| *id == call_id)
    }

    /// Every call id with a result currently waiting to be taken.
    ///
    /// Used by `conduit-ipc`'s cross-process status forwarder, which has no
    /// other way to discover which `InvokeResult`s have appeared since it
    /// last looked.
    pub fn invoke_result_ids(&self) -> Vec<u64> {
        self.invoke_results.iter().map(|(id, _)| *id).collect()
    }
}

struct Shared<S> {
    slots: Mutex<StatusCache<S>>,
    event: Event,
}

/// The writer half, held by the running `Runnable`'s worker scope.
///
/// Cloneable: both the `Runner`'s own worker-thread wrapper (which
/// brackets `execute()` with `Started`/`Complete`) and the `Runnable`
/// itself (which reports `Custom`/`InvokeResult`) hold independent clones
/// of the same underlying channel.
#[derive(Clone)]
pub struct StatusPublisher<S> {
    shared: Arc<Shared<S>>,
}

/// The reader half, held by whoever started the `Runnable`.
#[derive(Clone)]
pub struct StatusSubscription<S> {
    shared: Arc<Shared<S>>,
}

/// Create a fresh, empty publisher/subscription pair.
pub fn status_channel<S>() -> (StatusPublisher<S>, StatusSubscription<S>) {
    let shared = Arc::new(Shared {
        slots: Mutex::new(StatusCache::new()),
        event: Event::new(),
    });
    (
        StatusPublisher {
            shared: shared.clone(),
        },
        StatusSubscription { shared },
    )
}

impl<S> StatusPublisher<S> {
    /// Record a status message, overwriting any previous message of the same
    /// kind, and wake a waiter.
    pub fn publish(&self, status: Status<S>) {
        let mut slots = self.shared.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.apply(status);
        drop(slots);
        self.shared.event.set();
    }
}

impl<S: Clone> StatusSubscription<S> {
    /// `true` once `Status::Started` has been published.
    pub fn has_started(&self) -> bool {
        self.shared.slots.lock().unwrap_or_else(|e| e.into_inner()).has_started()
    }

    /// The latest `Custom` status, if any has been published yet.
    pub fn latest_custom(&self) -> Option<S> {
        self.shared.slots.lock().unwrap_or_else(|e| e.into_inner()).latest_custom()
    }

    /// The terminal status, if the worker has completed.
    pub fn completion(&self) -> Option<Option<ConduitError>> {
        self.shared.slots.lock().unwrap_or_else(|e| e.into_inner()).completion()
    }

    /// Take the result matching `call_id`, if it has arrived, removing it
    /// from the pending set.
    pub fn take_invoke_result(&self, call_id: u64) -> Option<Result<Value, ConduitError>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_invoke_result(call_id)
    }

    /// Every call id with a result currently waiting to be taken. See
    /// `StatusCache::invoke_result_ids`.
    pub fn pending_invoke_result_ids(&self) -> Vec<u64> {
        self.shared.slots.lock().unwrap_or_else(|e| e.into_inner()).invoke_result_ids()
    }

    /// Block until `Status::Started` has been published, or `timeout`
    /// elapses.
    pub fn wait_until_running(&self, timeout: Option<Duration>) -> Result<(), ConduitError> {
        self.wait_for(timeout, StatusCache::has_started)
    }

    /// Block until the matching `InvokeResult` has arrived, or `timeout`
    /// elapses, returning its payload.
    pub fn wait_for_invoke_result(
        &self,
        call_id: u64,
        timeout: Option<Duration>,
    ) -> Result<Result<Value, ConduitError>, ConduitError> {
        self.wait_for(timeout, |slots| slots.has_invoke_result(call_id))?;
        Ok(self
            .take_invoke_result(call_id)
            .expect("predicate guaranteed the slot was present"))
    }

    fn wait_for(
        &self,
        timeout: Option<Duration>,
        predicate: impl Fn(&StatusCache<S>) -> bool,
    ) -> Result<(), ConduitError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            {
                let slots = self.shared.slots.lock().unwrap_or_else(|e| e.into_inner());
                if predicate(&slots) {
                    return Ok(());
                }
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ConduitError::Timeout);
                    }
                    Some(deadline - now)
                }
            };
            if !self.shared.event.wait(remaining) && remaining.is_some() {
                // woken by timeout rather than a publish; loop re-checks the
                // deadline and returns Timeout above.
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_until_running_returns_once_started_is_published() {
        let (publisher, subscription) = status_channel::<()>();
        publisher.publish(Status::Started);
        assert!(subscription
            .wait_until_running(Some(Duration::from_millis(10)))
            .is_ok());
    }

    #[test]
    fn wait_until_running_times_out_without_a_publish() {
        let (_publisher, subscription) = status_channel::<()>();
        assert!(matches!(
            subscription.wait_until_running(Some(Duration::from_millis(10))),
            Err(ConduitError::Timeout)
        ));
    }

    #[test]
    fn custom_status_overwrites_the_previous_one() {
        let (publisher, subscription) = status_channel::<i32>();
        publisher.publish(Status::Custom(1));
        publisher.publish(Status::Custom(2));
        assert_eq!(subscription.latest_custom(), Some(2));
    }

    #[test]
    fn invoke_result_is_matched_by_call_id() {
        let (publisher, subscription) = status_channel::<()>();
        publisher.publish(Status::InvokeResult {
            call_id: 5,
            result: Ok(Value::Bool(true)),
        });
        let result = subscription.wait_for_invoke_result(5, Some(Duration::from_millis(10)));
        assert!(matches!(result, Ok(Ok(Value::Bool(true)))));
    }

    #[test]
    fn publish_from_another_thread_wakes_waiter() {
        let (publisher, subscription) = status_channel::<()>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish(Status::Started);
        });
        assert!(subscription
            .wait_until_running(Some(Duration::from_secs(2)))
            .is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn completion_carries_the_terminal_error() {
        let (publisher, subscription) = status_channel::<()>();
        publisher.publish(Status::Complete(Some(ConduitError::StillAlive)));
        assert!(matches!(
            subscription.completion(),
            Some(Some(ConduitError::StillAlive))
        ));
    }
}
