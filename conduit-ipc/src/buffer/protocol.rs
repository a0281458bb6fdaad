// SPDX-License-Identifier: GPL-3.0-or-later

//! The request/reply shapes exchanged over one RPC connection between a
//! `RemoteBufferCore<T>` handle and the `BufferServer<T>` that actually
//! owns the queue.
//!
//! Every request opens a fresh `TcpStream`, writes one `Request<T>` frame,
//! reads back exactly one `Response<T>` frame, and closes the connection —
//! the same one-shot-connection-per-call shape as the teacher's
//! `ReporterOnTcp::report`.

use conduit_core::item::Item;
use conduit_core::policy::UnexpectedSituationPolicy;
use serde::{Deserialize, Serialize};

/// A deadline, flattened to wire-friendly fields. Mirrors
/// `conduit_core::timeout::Timeout`, which does not itself derive
/// `Serialize` (its `Duration` payload does, but the three-variant shape is
/// reconstructed from these two fields instead of adding wire derives to a
/// type whose only other use is purely local, in-process, calling
/// convention).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireTimeout {
    pub wait_forever: bool,
    pub millis: Option<u64>,
}

impl WireTimeout {
    pub fn no_wait() -> Self {
        WireTimeout {
            wait_forever: false,
            millis: Some(0),
        }
    }
}

impl From<conduit_core::timeout::Timeout> for WireTimeout {
    fn from(timeout: conduit_core::timeout::Timeout) -> Self {
        use conduit_core::timeout::Timeout;
        match timeout {
            Timeout::NoWait => WireTimeout {
                wait_forever: false,
                millis: Some(0),
            },
            Timeout::Infinite => WireTimeout {
                wait_forever: true,
                millis: None,
            },
            Timeout::After(duration) => WireTimeout {
                wait_forever: false,
                millis: Some(duration.as_millis() as u64),
            },
        }
    }
}

impl From<WireTimeout> for conduit_core::timeout::Timeout {
    fn from(wire: WireTimeout) -> Self {
        use conduit_core::timeout::Timeout;
        use std::time::Duration;
        if wire.wait_forever {
            Timeout::Infinite
        } else {
            match wire.millis {
                Some(0) | None => Timeout::NoWait,
                Some(ms) => Timeout::After(Duration::from_millis(ms)),
            }
        }
    }
}

/// One call a `RemoteBufferCore<T>` can make against the authoritative
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request<T> {
    AttachPublisher,
    DetachPublisher,
    AttachSubscriber,
    DetachSubscriber,
    Push {
        item: Item<T>,
        timeout: WireTimeout,
        policy: UnexpectedSituationPolicy,
    },
    /// Issued in a loop by the subscriber-side relay thread. Blocks
    /// server-side for up to `poll_millis` waiting for an item; returns
    /// `Response::Empty` rather than blocking forever so the relay can
    /// periodically recheck its own stop flag.
    PopBlocking {
        poll_millis: u64,
    },
    IsClosed,
    Exit,
}

/// The server's reply to a `Request<T>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response<T> {
    Ok,
    Err(conduit_core::error::ConduitError),
    Item(Item<T>),
    Empty,
    Bool(bool),
}
