// SPDX-License-Identifier: GPL-3.0-or-later

//! The in-process buffer transport: a bounded `VecDeque` guarded by a
//! `Mutex`, with a `Condvar` publishers block on while full and an `Event`
//! the subscriber is woken through, plus the orphan-reclaim timer from
//! `discard`.

use super::core::BufferCore;
use super::discard::DiscardController;
use super::Buffer;
use crate::error::ConduitError;
use crate::event::Event;
use crate::item::Item;
use crate::policy::UnexpectedSituationPolicy;
use crate::timeout::Timeout;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct State<T> {
    queue: VecDeque<Item<T>>,
    publisher_count: usize,
    subscriber_present: bool,
    subscriber_event: Option<Event>,
    /// Set when the discard timer found a queued `Complete(None)` and threw
    /// it away: the *next* subscriber still deserves exactly one terminal,
    /// so one is synthesized for it at `attach_subscriber` time.
    pending_empty_completion: bool,
    /// Set when the discard timer found a queued `Complete(Some(err))`:
    /// surfaced to whoever next calls `attach_publisher`/`attach_subscriber`.
    raised_on_discard: Option<ConduitError>,
    closed: bool,
}

/// A bounded FIFO buffer living entirely within one process.
pub struct ThreadBuffer<T> {
    name: String,
    capacity: usize,
    warn_on_discard: bool,
    discard_delay: Duration,
    state: Arc<Mutex<State<T>>>,
    space_available: Condvar,
    discard: Arc<DiscardController>,
}

impl<T: Send + 'static> ThreadBuffer<T> {
    /// Build a new thread-scoped buffer and wrap it behind the common
    /// `Buffer` facade. `capacity` is the maximum number of queued items
    /// (including any unread `Complete`); `warn_on_discard` mirrors the
    /// original framework's `warn_on_discard` buffer option — log a warning
    /// whenever the orphan-reclaim timer actually throws items away.
    pub fn new(name: impl Into<String>, capacity: usize, warn_on_discard: bool) -> Buffer<T> {
        Buffer::from_core(Arc::new(ThreadBuffer {
            name: name.into(),
            capacity: capacity.max(1),
            warn_on_discard,
            discard_delay: Duration::from_secs(3),
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                publisher_count: 0,
                subscriber_present: false,
                subscriber_event: None,
                pending_empty_completion: false,
                raised_on_discard: None,
                closed: false,
            })),
            space_available: Condvar::new(),
            discard: DiscardController::new(),
        }))
    }

    fn arm_discard_if_orphaned(&self, state: &State<T>) {
        if state.publisher_count == 0 && !state.subscriber_present && !state.queue.is_empty() {
            let state_arc = self.state.clone();
            let name = self.name.clone();
            let warn_on_discard = self.warn_on_discard;
            self.discard.arm(self.discard_delay, move || {
                Self::fire_discard(state_arc, name, warn_on_discard);
            });
        }
    }

    fn fire_discard(state_arc: Arc<Mutex<State<T>>>, name: String, warn_on_discard: bool) {
        let mut state = state_arc.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed || state.queue.is_empty() {
            return;
        }
        let discarded: Vec<Item<T>> = state.queue.drain(..).collect();
        let count = discarded.len();
        for item in discarded {
            match item {
                Item::Value(_) => {}
                Item::Complete(None) => state.pending_empty_completion = true,
                Item::Complete(Some(err)) => state.raised_on_discard = Some(err),
            }
        }
        drop(state);
        if warn_on_discard {
            log::warn!("buffer '{name}' discarded {count} orphaned item(s) after the grace delay");
        }
    }
}

impl<T: Send + 'static> BufferCore<T> for ThreadBuffer<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(
        &self,
        item: Item<T>,
        timeout: Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        let deadline = timeout.deadline(Instant::now());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.closed {
                return Err(ConduitError::Invalid(format!(
                    "buffer '{}' has ended",
                    self.name
                )));
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(item);
                if let Some(event) = &state.subscriber_event {
                    event.set();
                }
                return Ok(());
            }
            let now = Instant::now();
            if deadline.expired(now) {
                return policy.apply(|| ConduitError::Full {
                    buffer: self.name.clone(),
                });
            }
            state = match deadline.remaining(now) {
                None => self
                    .space_available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(remaining) => {
                    let (guard, _) = self
                        .space_available
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }

    fn pop(&self) -> Result<Item<T>, ConduitError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(ConduitError::Invalid(format!(
                "buffer '{}' has ended",
                self.name
            )));
        }
        match state.queue.pop_front() {
            Some(item) => {
                self.space_available.notify_all();
                Ok(item)
            }
            None => Err(ConduitError::Empty {
                buffer: self.name.clone(),
            }),
        }
    }

    fn attach_publisher(&self) -> Result<(), ConduitError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = state.raised_on_discard.take() {
            return Err(err);
        }
        if state.closed {
            return Err(ConduitError::Invalid(format!(
                "buffer '{}' has ended",
                self.name
            )));
        }
        state.publisher_count += 1;
        self.discard.cancel();
        Ok(())
    }

    fn detach_publisher(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.publisher_count = state.publisher_count.saturating_sub(1);
        self.arm_discard_if_orphaned(&state);
    }

    fn attach_subscriber(&self, event: Option<Event>) -> Result<(), ConduitError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = state.raised_on_discard.take() {
            return Err(err);
        }
        if state.closed {
            return Err(ConduitError::Invalid(format!(
                "buffer '{}' has ended",
                self.name
            )));
        }
        if state.subscriber_present {
            return Err(ConduitError::Invalid(format!(
                "buffer '{}' already has a subscriber",
                self.name
            )));
        }
        state.subscriber_present = true;
        state.subscriber_event = event;
        self.discard.cancel();
        if state.pending_empty_completion {
            state.queue.push_back(Item::Complete(None));
            state.pending_empty_completion = false;
        }
        if !state.queue.is_empty() {
            if let Some(event) = &state.subscriber_event {
                event.set();
            }
        }
        Ok(())
    }

    fn detach_subscriber(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.subscriber_present {
            state.subscriber_present = false;
            state.subscriber_event = None;
            self.arm_discard_if_orphaned(&state);
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    fn exit(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.queue.clear();
        state.pending_empty_completion = false;
        state.raised_on_discard = None;
        self.discard.cancel();
        drop(state);
        self.space_available.notify_all();
    }
}
