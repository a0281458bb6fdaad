// SPDX-License-Identifier: GPL-3.0-or-later

//! The subscriber-and-publisher-side handle onto a buffer hosted by a
//! `BufferServer<T>` in another process.
//!
//! `push`/`attach_publisher`/`attach_subscriber`/`detach_publisher`/
//! `detach_subscriber`/`is_closed`/`exit` are each a one-shot RPC: open a
//! connection, send one `Request`, read back one `Response`, done.
//!
//! `pop` cannot be — `BufferCore::pop` must return immediately, but the
//! only way to learn "an item is now available" from another process is to
//! ask it, repeatedly, over the network. A background relay thread does
//! that asking: it keeps one blocking `PopBlocking` RPC in flight at a
//! time and feeds whatever it relays into a bounded `crossbeam_channel`,
//! which is what `pop` actually drains. This mirrors, at the process
//! boundary, the same "subscriber polls, wake-up event notifies" split
//! `ThreadBuffer` keeps within one process — the relay thread stands in
//! for the `Event` a same-process subscriber would otherwise be woken by,
//! and the bounded channel stands in for `ThreadBuffer`'s own capacity
//! check, the same way the teacher's `EventCollectorOnTcp::collect` hands
//! relayed events to its caller through a `crossbeam_channel::Sender`
//! rather than a hand-rolled queue.

use crate::buffer::protocol::{Request, Response, WireTimeout};
use crate::wire::{read_frame, write_frame};
use conduit_core::buffer::BufferCore;
use conduit_core::error::ConduitError;
use conduit_core::event::Event;
use conduit_core::item::Item;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::timeout::Timeout;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long each `PopBlocking` RPC is allowed to block server-side before
/// the relay thread re-issues it, and also the granularity at which the
/// relay rechecks its own stop flag while blocked trying to hand an item
/// to a full local channel. Short enough that `detach_subscriber`'s stop
/// flag is noticed promptly, long enough that a quiet stream does not
/// spend most of its time opening and tearing down connections.
const RELAY_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn call<T: Serialize + DeserializeOwned>(
    address: SocketAddr,
    request: &Request<T>,
) -> Result<Response<T>, ConduitError> {
    if !address.ip().is_loopback() {
        return Err(ConduitError::Invalid(format!(
            "cross-process buffer transport is loopback-only, refusing to dial {address}"
        )));
    }
    let mut stream = TcpStream::connect(address)?;
    write_frame(&mut stream, request).map_err(|e| ConduitError::Io(e.to_string()))?;
    read_frame(&mut stream).map_err(|e| ConduitError::Io(e.to_string()))
}

fn expect_ok<T>(response: Response<T>) -> Result<(), ConduitError> {
    match response {
        Response::Ok => Ok(()),
        Response::Err(err) => Err(err),
        other => Err(ConduitError::Invalid(format!(
            "unexpected RPC reply: {other:?}"
        ))),
    }
}

/// The client-side `BufferCore` implementation: every call but `pop`
/// crosses the network directly; `pop` drains the bounded channel a
/// background relay thread keeps filled.
pub struct RemoteBufferCore<T> {
    name: String,
    address: SocketAddr,
    sender: Sender<Item<T>>,
    receiver: Receiver<Item<T>>,
    relay_running: Arc<AtomicBool>,
}

impl<T> RemoteBufferCore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, address: SocketAddr, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        RemoteBufferCore {
            name: name.into(),
            address,
            sender,
            receiver,
            relay_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the relay thread, unless one is already running. Safe to
    /// call on every `attach_subscriber`: re-subscribing after a detach
    /// reuses the same channel, since the relay thread only ever drops its
    /// own `Sender` clone, never the shared one this struct holds.
    fn start_relay(&self, event: Option<Event>) {
        if self.relay_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let address = self.address;
        let sender = self.sender.clone();
        let running = self.relay_running.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let request = Request::PopBlocking {
                    poll_millis: RELAY_POLL_INTERVAL.as_millis() as u64,
                };
                let response = match call::<T>(address, &request) {
                    Ok(response) => response,
                    Err(_) => {
                        thread::sleep(RELAY_POLL_INTERVAL);
                        continue;
                    }
                };
                match response {
                    Response::Item(item) => {
                        if !hand_off(&sender, item, &running) {
                            return;
                        }
                        if let Some(event) = &event {
                            event.set();
                        }
                    }
                    Response::Empty => {}
                    Response::Err(_) => return,
                    other => {
                        log::warn!("relay thread got an unexpected RPC reply: {other:?}");
                    }
                }
            }
        });
    }

    fn stop_relay(&self) {
        self.relay_running.store(false, Ordering::SeqCst);
    }
}

/// Hand `item` to the local channel, retrying on a bounded timeout so the
/// relay thread periodically rechecks `running` even while the consumer
/// side is lagging. Returns `false` if the channel has disconnected (the
/// `RemoteBufferCore` itself was dropped) and the relay should exit.
fn hand_off<T>(sender: &Sender<Item<T>>, mut item: Item<T>, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        match sender.send_timeout(item, RELAY_POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                item = returned;
                continue;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

impl<T> BufferCore<T> for RemoteBufferCore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, item: Item<T>, timeout: Timeout, policy: UnexpectedSituationPolicy) -> Result<(), ConduitError> {
        let response = call(
            self.address,
            &Request::Push {
                item,
                timeout: WireTimeout::from(timeout),
                policy,
            },
        )?;
        expect_ok(response)
    }

    fn pop(&self) -> Result<Item<T>, ConduitError> {
        self.receiver.try_recv().map_err(|_| ConduitError::Empty {
            buffer: self.name.clone(),
        })
    }

    fn attach_publisher(&self) -> Result<(), ConduitError> {
        expect_ok(call(self.address, &Request::AttachPublisher)?)
    }

    fn detach_publisher(&self) {
        let _ = call::<T>(self.address, &Request::DetachPublisher);
    }

    fn attach_subscriber(&self, event: Option<Event>) -> Result<(), ConduitError> {
        expect_ok(call(self.address, &Request::AttachSubscriber)?)?;
        self.start_relay(event);
        Ok(())
    }

    fn detach_subscriber(&self) {
        self.stop_relay();
        let _ = call::<T>(self.address, &Request::DetachSubscriber);
    }

    fn is_closed(&self) -> bool {
        match call::<T>(self.address, &Request::IsClosed) {
            Ok(Response::Bool(closed)) => closed,
            _ => true,
        }
    }

    fn exit(&self) {
        self.stop_relay();
        let _ = call::<T>(self.address, &Request::Exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::server::BufferServer;
    use conduit_core::buffer::Buffer;
    use std::time::Duration;

    #[test]
    fn remote_push_and_pop_round_trip_through_the_relay() {
        let (_server, address) = BufferServer::<i32>::host("rb", 4, false).unwrap();
        let remote: Buffer<i32> = Buffer::from_core(Arc::new(RemoteBufferCore::new("rb", address, 4)));
        let mut publisher = {
            use conduit_core::buffer::Publishable;
            remote.publish().unwrap()
        };
        let mut subscription = {
            use conduit_core::buffer::Observable;
            remote.subscribe(None).unwrap()
        };
        publisher
            .publish_value(9, Timeout::NoWait, UnexpectedSituationPolicy::Raise)
            .unwrap();

        let mut seen = None;
        for _ in 0..50 {
            let result = subscription.call_events(|item| seen = item.value());
            if result.is_ok() && seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, Some(9));
    }

    #[test]
    fn a_non_loopback_address_is_refused_without_attempting_a_connection() {
        let address: SocketAddr = "93.184.216.34:80".parse().unwrap();
        let remote: RemoteBufferCore<i32> = RemoteBufferCore::new("rb2", address, 4);
        let result = remote.push(Item::Value(1), Timeout::NoWait, UnexpectedSituationPolicy::Raise);
        assert!(matches!(result, Err(ConduitError::Invalid(_))));
    }
}
