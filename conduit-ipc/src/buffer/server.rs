// SPDX-License-Identifier: GPL-3.0-or-later

//! The authoritative side of a cross-process buffer: a `TcpListener`
//! fronting the same bounded-queue state `ThreadBuffer` keeps, except the
//! queue is driven entirely by RPCs instead of in-process method calls.
//!
//! Grounded on the teacher's `intercept::tcp::CollectorOnTcp::produce`,
//! whose own comment is the direct precedent for the concurrency model
//! here: "process the connection in a separate thread or task". Each
//! accepted connection carries exactly one `Request`/`Response` pair and is
//! then dropped, the same one-shot-connection shape `ReporterOnTcp::report`
//! uses on the client side.

use crate::wire::{read_frame, write_frame};
use crate::buffer::protocol::{Request, Response};
use conduit_core::error::ConduitError;
use conduit_core::item::Item;
use conduit_core::policy::UnexpectedSituationPolicy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period before an orphaned, unread queue is discarded, mirroring
/// the `conduit-core` in-process buffer's own timer but set to the longer
/// cross-process value: an RPC round trip and a fresh TCP connection cost
/// more than an in-process `attach_subscriber` call, so a slow-to-arrive
/// subscriber is given more slack before its queue is thrown away.
const DISCARD_DELAY: Duration = Duration::from_secs(8);

#[derive(Default)]
struct DiscardState {
    armed: bool,
    generation: u64,
}

/// A duplicate of `conduit_core::buffer`'s private discard timer. That
/// module keeps `DiscardController` crate-private since only its own
/// `ThreadBuffer` needs it; `BufferServer` needs the identical behavior
/// but lives in a different crate, so the small amount of logic is
/// repeated here rather than widening the core crate's public surface for
/// one consumer.
struct DiscardTimer {
    state: Mutex<DiscardState>,
}

impl DiscardTimer {
    fn new() -> Arc<Self> {
        Arc::new(DiscardTimer {
            state: Mutex::new(DiscardState::default()),
        })
    }

    fn arm(self: &Arc<Self>, delay: Duration, fire: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.armed {
            return;
        }
        state.armed = true;
        let generation = state.generation;
        drop(state);

        let weak: Weak<Self> = Arc::downgrade(self);
        thread::spawn(move || {
            thread::sleep(delay);
            let Some(timer) = weak.upgrade() else {
                return;
            };
            let mut state = timer.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.armed && state.generation == generation {
                state.armed = false;
                drop(state);
                fire();
            }
        });
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.armed {
            state.armed = false;
            state.generation = state.generation.wrapping_add(1);
        }
    }
}

struct State<T> {
    queue: VecDeque<Item<T>>,
    publisher_count: usize,
    subscriber_present: bool,
    pending_empty_completion: bool,
    raised_on_discard: Option<ConduitError>,
    closed: bool,
}

/// The process-hosting side of a cross-process buffer.
///
/// Bound to `127.0.0.1:0` at construction and handed back its resolved
/// `SocketAddr` so the hosting process can pass it to whichever child
/// process needs to `connect`.
pub struct BufferServer<T> {
    name: String,
    capacity: usize,
    warn_on_discard: bool,
    state: Arc<Mutex<State<T>>>,
    space_available: Condvar,
    item_available: Condvar,
    discard: Arc<DiscardTimer>,
}

impl<T> BufferServer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start hosting a fresh, empty buffer and accept connections for it in
    /// the background. Returns the server (so the hosting process can also
    /// use it directly as a `BufferCore`-like handle, if it wants a local
    /// publisher/subscriber without going over the loopback socket) and the
    /// address remote processes connect to.
    pub fn host(
        name: impl Into<String>,
        capacity: usize,
        warn_on_discard: bool,
    ) -> Result<(Arc<Self>, SocketAddr), ConduitError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;

        let server = Arc::new(BufferServer {
            name: name.into(),
            capacity: capacity.max(1),
            warn_on_discard,
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                publisher_count: 0,
                subscriber_present: false,
                pending_empty_completion: false,
                raised_on_discard: None,
                closed: false,
            })),
            space_available: Condvar::new(),
            item_available: Condvar::new(),
            discard: DiscardTimer::new(),
        });

        let accept_server = server.clone();
        thread::spawn(move || {
            for connection in listener.incoming() {
                let Ok(stream) = connection else { continue };
                let server = accept_server.clone();
                thread::spawn(move || handle_connection(server, stream));
            }
        });

        Ok((server, address))
    }

    fn arm_discard_if_orphaned(&self, state: &State<T>) {
        if state.publisher_count == 0 && !state.subscriber_present && !state.queue.is_empty() {
            let state_arc = self.state.clone();
            let name = self.name.clone();
            let warn_on_discard = self.warn_on_discard;
            self.discard.arm(DISCARD_DELAY, move || {
                Self::fire_discard(&state_arc, &name, warn_on_discard);
            });
        }
    }

    fn fire_discard(state_mutex: &Mutex<State<T>>, name: &str, warn_on_discard: bool) {
        let mut state = state_mutex.lock().unwrap_or_else(|e| e.into_inner());
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

    fn push(
        &self,
        item: Item<T>,
        timeout: conduit_core::timeout::Timeout,
        policy: UnexpectedSituationPolicy,
    ) -> Result<(), ConduitError> {
        let deadline = timeout.deadline(Instant::now());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut item = Some(item);
        loop {
            if state.closed {
                return Err(ConduitError::Invalid(format!("buffer '{}' has ended", self.name)));
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(item.take().expect("pushed at most once"));
                drop(state);
                self.item_available.notify_all();
                return Ok(());
            }
            let now = Instant::now();
            if deadline.expired(now) {
                return policy.apply(|| ConduitError::Full {
                    buffer: self.name.clone(),
                });
            }
            state = match deadline.remaining(now) {
                None => self.space_available.wait(state).unwrap_or_else(|e| e.into_inner()),
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

    /// Block for up to `poll_duration` waiting for an item, returning
    /// `Ok(None)` on a timeout rather than blocking forever — the
    /// subscriber-side relay thread calls this in a loop so it can
    /// periodically recheck its own stop flag between polls.
    fn pop_blocking(&self, poll_duration: Duration) -> Result<Option<Item<T>>, ConduitError> {
        let deadline = Instant::now() + poll_duration;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.closed {
                return Err(ConduitError::Invalid(format!("buffer '{}' has ended", self.name)));
            }
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.space_available.notify_all();
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .item_available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    fn attach_publisher(&self) -> Result<(), ConduitError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = state.raised_on_discard.take() {
            return Err(err);
        }
        if state.closed {
            return Err(ConduitError::Invalid(format!("buffer '{}' has ended", self.name)));
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

    fn attach_subscriber(&self) -> Result<(), ConduitError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = state.raised_on_discard.take() {
            return Err(err);
        }
        if state.closed {
            return Err(ConduitError::Invalid(format!("buffer '{}' has ended", self.name)));
        }
        if state.subscriber_present {
            return Err(ConduitError::Invalid(format!(
                "buffer '{}' already has a subscriber",
                self.name
            )));
        }
        state.subscriber_present = true;
        self.discard.cancel();
        if state.pending_empty_completion {
            state.queue.push_back(Item::Complete(None));
            state.pending_empty_completion = false;
        }
        let has_items = !state.queue.is_empty();
        drop(state);
        if has_items {
            self.item_available.notify_all();
        }
        Ok(())
    }

    fn detach_subscriber(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.subscriber_present {
            state.subscriber_present = false;
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
        self.item_available.notify_all();
    }
}

fn handle_request<T>(server: &BufferServer<T>, request: Request<T>) -> Response<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match request {
        Request::AttachPublisher => match server.attach_publisher() {
            Ok(()) => Response::Ok,
            Err(err) => Response::Err(err),
        },
        Request::DetachPublisher => {
            server.detach_publisher();
            Response::Ok
        }
        Request::AttachSubscriber => match server.attach_subscriber() {
            Ok(()) => Response::Ok,
            Err(err) => Response::Err(err),
        },
        Request::DetachSubscriber => {
            server.detach_subscriber();
            Response::Ok
        }
        Request::Push { item, timeout, policy } => {
            match server.push(item, timeout.into(), policy) {
                Ok(()) => Response::Ok,
                Err(err) => Response::Err(err),
            }
        }
        Request::PopBlocking { poll_millis } => {
            match server.pop_blocking(Duration::from_millis(poll_millis)) {
                Ok(Some(item)) => Response::Item(item),
                Ok(None) => Response::Empty,
                Err(err) => Response::Err(err),
            }
        }
        Request::IsClosed => Response::Bool(server.is_closed()),
        Request::Exit => {
            server.exit();
            Response::Ok
        }
    }
}

fn handle_connection<T>(server: Arc<BufferServer<T>>, mut stream: TcpStream)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let request: Request<T> = match read_frame(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("buffer '{}' dropped a malformed RPC: {err}", server.name);
            return;
        }
    };
    let response = handle_request(&server, request);
    if let Err(err) = write_frame(&mut stream, &response) {
        log::warn!("buffer '{}' could not write an RPC reply: {err}", server.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::protocol::WireTimeout;
    use std::io::Write;

    fn call<T: Serialize + DeserializeOwned>(address: SocketAddr, request: &Request<T>) -> Response<T> {
        let mut stream = TcpStream::connect(address).unwrap();
        write_frame(&mut stream, request).unwrap();
        stream.flush().unwrap();
        read_frame(&mut stream).unwrap()
    }

    #[test]
    fn pushed_value_is_popped_back_in_order() {
        let (_server, address) = BufferServer::<i32>::host("b", 4, false).unwrap();
        assert!(matches!(call(address, &Request::AttachPublisher), Response::Ok));
        assert!(matches!(call(address, &Request::AttachSubscriber), Response::Ok));
        assert!(matches!(
            call(
                address,
                &Request::Push {
                    item: Item::Value(7),
                    timeout: WireTimeout::no_wait(),
                    policy: UnexpectedSituationPolicy::Raise,
                }
            ),
            Response::Ok
        ));
        match call::<i32>(address, &Request::PopBlocking { poll_millis: 50 }) {
            Response::Item(Item::Value(7)) => {}
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn pop_blocking_times_out_to_empty_when_nothing_arrives() {
        let (_server, address) = BufferServer::<i32>::host("b2", 4, false).unwrap();
        assert!(matches!(call(address, &Request::AttachSubscriber), Response::Ok));
        match call::<i32>(address, &Request::PopBlocking { poll_millis: 20 }) {
            Response::Empty => {}
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn a_second_subscriber_is_rejected() {
        let (_server, address) = BufferServer::<i32>::host("b3", 4, false).unwrap();
        assert!(matches!(call::<i32>(address, &Request::AttachSubscriber), Response::Ok));
        assert!(matches!(
            call::<i32>(address, &Request::AttachSubscriber),
            Response::Err(ConduitError::Invalid(_))
        ));
    }

    #[test]
    fn exit_closes_the_buffer_for_future_calls() {
        let (_server, address) = BufferServer::<i32>::host("b4", 4, false).unwrap();
        assert!(matches!(call::<i32>(address, &Request::Exit), Response::Ok));
        assert!(matches!(call::<i32>(address, &Request::IsClosed), Response::Bool(true)));
    }
}
