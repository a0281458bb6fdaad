// SPDX-License-Identifier: GPL-3.0-or-later

//! Cross-process transport for `conduit-core`: a `Buffer<T>` kind whose
//! queue lives in one process and is reached by every other process over a
//! loopback TCP connection, plus the `ProcessRunner` that supervises a
//! `Runnable` in a child process wired through that transport.
//!
//! `conduit-core` defines the traits (`BufferCore`, `Runnable`,
//! `RunnerControl`) and the thread-scoped implementations; this crate adds
//! the process-scoped siblings on top.

pub mod buffer;
pub mod process;
pub mod status;
pub mod wire;

pub use buffer::{connect, host, BufferServer, RemoteBufferCore};
pub use process::{run_if_child, ProcessRunner, RendezvousInfo, RENDEZVOUS_ENV_VAR};
pub use status::{
    connect_status, connect_status_publisher, forward_local_status, host_status,
    host_status_channel, IpcStatusPublisher, IpcStatusSubscription,
};
pub use wire::{read_frame, write_frame, WireError};
