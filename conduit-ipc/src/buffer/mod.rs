// SPDX-License-Identifier: GPL-3.0-or-later

//! A bounded FIFO buffer whose authoritative queue lives in one process and
//! is reached by every other process over a loopback TCP connection.
//!
//! The same `conduit_core::buffer::Buffer<T>` facade fronts this transport
//! as fronts `ThreadBuffer`: a `Runnable` written against `Buffer<T>` cannot
//! tell, and does not need to, whether its input crosses a process
//! boundary.

mod client;
mod protocol;
mod server;

pub use client::RemoteBufferCore;
pub use protocol::{Request, Response, WireTimeout};
pub use server::BufferServer;

use conduit_core::buffer::Buffer;
use conduit_core::error::ConduitError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Host a new cross-process buffer in this process and return a `Buffer<T>`
/// handle onto it plus the address other processes dial to reach it.
///
/// The hosting process is free to use its own returned `Buffer<T>` exactly
/// like any other — including as the sole subscriber, with every publisher
/// living elsewhere — since the handle talks to the server over the same
/// loopback RPC path a remote process would use.
pub fn host<T>(
    name: impl Into<String>,
    capacity: usize,
    warn_on_discard: bool,
) -> Result<(Buffer<T>, SocketAddr), ConduitError>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let name = name.into();
    let (_server, address) = BufferServer::<T>::host(name.clone(), capacity, warn_on_discard)?;
    let buffer = Buffer::from_core(Arc::new(RemoteBufferCore::new(name, address, capacity)));
    Ok((buffer, address))
}

/// Attach to a buffer already hosted by another process at `address`.
pub fn connect<T>(name: impl Into<String>, address: SocketAddr, capacity: usize) -> Buffer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Buffer::from_core(Arc::new(RemoteBufferCore::new(name, address, capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::buffer::{Observable, Publishable};
    use conduit_core::policy::UnexpectedSituationPolicy;
    use conduit_core::timeout::Timeout;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn a_hosted_buffer_is_reachable_by_a_separately_connected_handle() {
        let (hosted, address) = host::<i32>("cp", 4, false).unwrap();
        let mut publisher = hosted.publish().unwrap();

        let remote: Buffer<i32> = connect("cp", address, 4);
        let mut subscription = remote.subscribe(None).unwrap();

        publisher
            .publish_value(3, Timeout::NoWait, UnexpectedSituationPolicy::Raise)
            .unwrap();

        let mut seen = None;
        for _ in 0..50 {
            if subscription.call_events(|item| seen = item.value()).is_ok() && seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, Some(3));
    }
}
