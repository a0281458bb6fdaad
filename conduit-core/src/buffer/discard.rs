// SPDX-License-Identifier: GPL-3.0-or-later

//! The orphan-reclaim timer: when a buffer's last publisher detaches while
//! items remain queued and unread, the queue is not kept alive forever —
//! after a grace delay the buffer is free to discard what nobody is ever
//! going to read.
//!
//! This exists so that a producer that crashed or was dropped doesn't pin
//! memory behind a subscriber that may never arrive. The delay is generous
//! (3s for an in-process buffer, 8s across a process boundary) specifically
//! so a subscriber that is merely slow to `subscribe()` is not punished for
//! a race it didn't lose.

use std::sync::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct State {
    armed: bool,
    generation: u64,
}

/// A cancellable, at-most-one-in-flight delayed callback.
pub struct DiscardController {
    state: Mutex<State>,
}

impl DiscardController {
    pub fn new() -> Arc<Self> {
        Arc::new(DiscardController {
            state: Mutex::new(State::default()),
        })
    }

    /// Arm the timer if it is not already armed. A second `arm` call while
    /// one is pending is a no-op: only one discard timer is ever in flight
    /// per buffer.
    ///
    /// `fire` runs on a dedicated thread after `delay`, unless `cancel` is
    /// called first — including by a subsequent `arm`, which bumps the
    /// generation and so silently retires any timer already in flight.
    pub fn arm(self: &Arc<Self>, delay: Duration, fire: impl FnOnce() + Send + 'static) {
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
            let Some(controller) = weak.upgrade() else {
                return;
            };
            let mut state = controller.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.armed && state.generation == generation {
                state.armed = false;
                drop(state);
                fire();
            }
        });
    }

    /// Cancel a pending timer, if one is armed. Idempotent.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.armed {
            state.armed = false;
            state.generation = state.generation.wrapping_add(1);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn fires_after_the_delay() {
        let controller = DiscardController::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        controller.arm(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_before_the_delay_suppresses_the_fire() {
        let controller = DiscardController::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        controller.arm(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        controller.cancel();
        thread::sleep(Duration::from_millis(120));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn a_second_arm_while_pending_is_a_no_op() {
        let controller = DiscardController::new();
        let count = Arc::new(Mutex::new(0u32));
        let c1 = count.clone();
        controller.arm(Duration::from_millis(30), move || {
            *c1.lock().unwrap() += 1;
        });
        let c2 = count.clone();
        controller.arm(Duration::from_millis(30), move || {
            *c2.lock().unwrap() += 1;
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
