// SPDX-License-Identifier: GPL-3.0-or-later

//! The cross-process counterpart of `conduit_core::status`: a
//! `Status<S>` channel reachable over the loopback socket a `BufferServer`
//! fronts.
//!
//! Status messages carry "latest of each kind, no backpressure" semantics
//! even in-process (`StatusCache` overwrites rather than queues), so this
//! is not laid on top of the general-purpose `CrossProcessBuffer` the way a
//! data pipe is: every publish uses `Ignore` policy and `Timeout::NoWait`,
//! because a status update that arrives late or is dropped under backlog is
//! never something worth blocking a worker over.

use crate::buffer::{connect, host};
use conduit_core::buffer::{Buffer, Observable, Publishable, PublisherSession};
use conduit_core::error::ConduitError;
use conduit_core::event::Event;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::status::{Status, StatusCache};
use conduit_core::timeout::Timeout;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Queue depth for the underlying transport. Generous, since nothing here
/// ever blocks on it: a publisher that outruns the reader just overwrites
/// its own most recent message once the reader catches up, the same as the
/// in-process cache would.
const STATUS_BUFFER_CAPACITY: usize = 1024;

/// The writer half, held by whichever side actually runs the `Runnable`.
pub struct IpcStatusPublisher<S> {
    session: Arc<Mutex<PublisherSession<Status<S>>>>,
}

impl<S> Clone for IpcStatusPublisher<S> {
    fn clone(&self) -> Self {
        IpcStatusPublisher {
            session: self.session.clone(),
        }
    }
}

impl<S> IpcStatusPublisher<S> {
    /// Report a status message. Failures (the remote side has gone away,
    /// the connection dropped) are swallowed: status reporting must never
    /// be the reason a worker fails, the same contract `StatusPublisher`
    /// gives in-process.
    pub fn publish(&self, status: Status<S>) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let _ = session.publish_value(status, Timeout::NoWait, UnexpectedSituationPolicy::Ignore);
    }
}

/// Host a fresh status channel and return the publisher half plus the
/// address a remote `connect_status` call dials to read it.
pub fn host_status<S>(name: impl Into<String>) -> Result<(IpcStatusPublisher<S>, SocketAddr), ConduitError>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let (buffer, address) = host::<Status<S>>(name, STATUS_BUFFER_CAPACITY, false)?;
    Ok((publisher_for(buffer)?, address))
}

/// Host a fresh status channel and return the *reader* half plus the
/// address a remote `connect_status_publisher` call dials to write into
/// it. The mirror image of `host_status`: used by whichever side wants to
/// observe a `Runnable` it does not itself run (a `ProcessRunner` reading
/// its child's status).
pub fn host_status_channel<S>(name: impl Into<String>) -> Result<(IpcStatusSubscription<S>, SocketAddr), ConduitError>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let name = name.into();
    let (_server, address) = crate::buffer::BufferServer::<Status<S>>::host(name.clone(), STATUS_BUFFER_CAPACITY, false)?;
    let subscription = connect_status::<S>(name, address);
    Ok((subscription, address))
}

/// Attach a publisher to a status channel already hosted elsewhere, for a
/// process that needs to report into a channel someone else is reading.
pub fn connect_status_publisher<S>(
    name: impl Into<String>,
    address: SocketAddr,
) -> Result<IpcStatusPublisher<S>, ConduitError>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let buffer: Buffer<Status<S>> = connect(name, address, STATUS_BUFFER_CAPACITY);
    publisher_for(buffer)
}

fn publisher_for<S>(buffer: Buffer<Status<S>>) -> Result<IpcStatusPublisher<S>, ConduitError>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let session = buffer.publish()?;
    Ok(IpcStatusPublisher {
        session: Arc::new(Mutex::new(session)),
    })
}

struct Shared<S> {
    cache: Mutex<StatusCache<S>>,
    event: Event,
}

/// The reader half. Backed by a relay thread draining the remote channel
/// into a local `StatusCache`, so every query method reads as cheaply as
/// the in-process `StatusSubscription` does.
pub struct IpcStatusSubscription<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for IpcStatusSubscription<S> {
    fn clone(&self) -> Self {
        IpcStatusSubscription {
            shared: self.shared.clone(),
        }
    }
}

/// Connect to a status channel hosted elsewhere and start relaying it.
pub fn connect_status<S>(name: impl Into<String>, address: SocketAddr) -> IpcStatusSubscription<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let buffer: Buffer<Status<S>> = connect(name, address, STATUS_BUFFER_CAPACITY);
    let shared = Arc::new(Shared {
        cache: Mutex::new(StatusCache::new()),
        event: Event::new(),
    });
    let relay_shared = shared.clone();
    thread::spawn(move || {
        let wake = Event::new();
        let mut subscription = match buffer.subscribe(Some(wake.clone())) {
            Ok(subscription) => subscription,
            Err(_) => return,
        };
        loop {
            match subscription.call_events(|item| {
                if let Some(status) = item.value() {
                    let mut cache = relay_shared.cache.lock().unwrap_or_else(|e| e.into_inner());
                    cache.apply(status);
                    drop(cache);
                    relay_shared.event.set();
                }
            }) {
                Ok(()) => {}
                Err(ConduitError::Empty { .. }) => {
                    wake.wait(Some(Duration::from_millis(500)));
                }
                Err(_) => return,
            }
        }
    });
    IpcStatusSubscription { shared }
}

impl<S: Clone> IpcStatusSubscription<S> {
    pub fn has_started(&self) -> bool {
        self.shared.cache.lock().unwrap_or_else(|e| e.into_inner()).has_started()
    }

    pub fn latest_custom(&self) -> Option<S> {
        self.shared.cache.lock().unwrap_or_else(|e| e.into_inner()).latest_custom()
    }

    pub fn completion(&self) -> Option<Option<ConduitError>> {
        self.shared.cache.lock().unwrap_or_else(|e| e.into_inner()).completion()
    }

    pub fn take_invoke_result(&self, call_id: u64) -> Option<Result<Value, ConduitError>> {
        self.shared
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_invoke_result(call_id)
    }

    pub fn wait_until_running(&self, timeout: Option<Duration>) -> Result<(), ConduitError> {
        self.wait_for(timeout, StatusCache::has_started)
    }

    pub fn wait_for_invoke_result(
        &self,
        call_id: u64,
        timeout: Option<Duration>,
    ) -> Result<Result<Value, ConduitError>, ConduitError> {
        self.wait_for(timeout, |cache| cache.has_invoke_result(call_id))?;
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
                let cache = self.shared.cache.lock().unwrap_or_else(|e| e.into_inner());
                if predicate(&cache) {
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
            self.shared.event.wait(remaining);
        }
    }
}

/// Drains a local, in-process `StatusSubscription` and republishes every
/// change onto an `IpcStatusPublisher`, so a worker that only knows how to
/// talk to the in-process status API (every `Runnable` built on
/// `RunnableBase`) can still be observed from another process.
///
/// Polling rather than event-driven: `StatusCache` only ever exposes
/// "latest value of each kind", so there is nothing to miss by checking it
/// periodically instead of being pushed to on every write — the in-process
/// reader side already accepts that a `Custom` value can be overwritten
/// before anyone observes it.
pub fn forward_local_status<S>(
    local: conduit_core::status::StatusSubscription<S>,
    remote: IpcStatusPublisher<S>,
) where
    S: Clone + Send + 'static,
{
    thread::spawn(move || {
        let mut forwarded_invoke_ids = Vec::new();
        loop {
            if local.has_started() {
                remote.publish(Status::Started);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        loop {
            // Forwarded on every tick rather than only on change: there is
            // no cheap way to tell "changed" apart from "read again" once
            // the value only lives behind `latest_custom`'s clone, and a
            // repeated identical `Custom` is harmless on the reading side
            // (it just overwrites the cache slot with the same value).
            if let Some(custom) = local.latest_custom() {
                remote.publish(Status::Custom(custom));
            }
            for call_id in local.pending_invoke_result_ids() {
                if forwarded_invoke_ids.contains(&call_id) {
                    continue;
                }
                if let Some(result) = local.take_invoke_result(call_id) {
                    remote.publish(Status::InvokeResult { call_id, result });
                    forwarded_invoke_ids.push(call_id);
                }
            }
            if let Some(err) = local.completion() {
                remote.publish(Status::Complete(err));
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn a_published_status_is_observed_through_the_relay() {
        let (publisher, address) = host_status::<i32>("st").unwrap();
        let subscription = connect_status::<i32>("st", address);
        publisher.publish(Status::Started);
        publisher.publish(Status::Custom(7));
        assert!(subscription
            .wait_until_running(Some(Duration::from_secs(2)))
            .is_ok());
        let mut seen = None;
        for _ in 0..50 {
            seen = subscription.latest_custom();
            if seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, Some(7));
    }
}
