// SPDX-License-Identifier: GPL-3.0-or-later

//! A wake-up primitive shared between a buffer's publishers and its single
//! subscriber.
//!
//! An auto-reset event: `set()` wakes exactly one waiter and clears itself,
//! so subsequent waiters must wait for the next `set()`. The standard
//! library has no such primitive, so it's built directly on `Mutex`/`Condvar`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

/// A cloneable handle to an auto-reset event.
///
/// Multiple publishers may hold clones of the same `Event` and call `set`
/// concurrently; exactly one `wait` returns per `set` (extra `set` calls
/// before a `wait` coalesce into a single pending wake-up, matching the
/// buffer's "set at least once per push" guarantee rather than a counting
/// semaphore).
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<Inner>,
}

impl Event {
    /// Create a new, initially unsignalled, event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake one waiter. Idempotent while nobody is waiting: a burst of
    /// `set()` calls before the next `wait()` is observed as a single
    /// pending wake-up.
    pub fn set(&self) {
        let mut signalled = self.inner.signalled.lock().unwrap_or_else(|e| e.into_inner());
        *signalled = true;
        self.inner.condvar.notify_one();
    }

    /// Block until `set()` has been called, or `timeout` elapses. Returns
    /// `true` if the event fired, `false` on timeout. Consumes the pending
    /// signal (auto-reset).
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signalled = self.inner.signalled.lock().unwrap_or_else(|e| e.into_inner());
        match timeout {
            None => {
                while !*signalled {
                    signalled = self
                        .inner
                        .condvar
                        .wait(signalled)
                        .unwrap_or_else(|e| e.into_inner());
                }
                *signalled = false;
                true
            }
            Some(duration) => {
                let deadline = Instant::now() + duration;
                while !*signalled {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, result) = self
                        .inner
                        .condvar
                        .wait_timeout(signalled, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    signalled = guard;
                    if result.timed_out() && !*signalled {
                        return false;
                    }
                }
                *signalled = false;
                true
            }
        }
    }

    /// Non-blocking check-and-consume of the pending signal.
    pub fn try_wait(&self) -> bool {
        self.wait(Some(Duration::ZERO))
    }
}
