// SPDX-License-Identifier: GPL-3.0-or-later

//! The optional periodic wake-up a servicing loop can offer its `Runnable`,
//! alongside its inputs and command channel.
//!
//! Tick state is mutated only from inside the servicing loop, by handling
//! `TickCommand` the same way any other command is handled — the loop
//! computes its own wait timeout from this clock once per iteration, so
//! there is exactly one thread ever touching it and no locking is needed.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A command that mutates a `TickClock`. Carried inside `Command::Tick` so
/// it travels through the same ordered channel as every other command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TickCommand {
    /// Start (or change) ticking at the given interval.
    SetInterval(Duration),
    /// Suspend ticking without forgetting the configured interval.
    Pause,
    /// Resume ticking from where it was paused.
    Resume,
}

/// Tracks when the next tick is due. `None` interval means "no ticking has
/// been configured yet"; `paused` suspends firing without losing the
/// interval or the schedule.
#[derive(Debug, Default)]
pub struct TickClock {
    interval: Option<Duration>,
    paused: bool,
    next_due: Option<Instant>,
}

impl TickClock {
    pub fn new() -> Self {
        TickClock::default()
    }

    /// Apply a `TickCommand`, anchored to `now`.
    pub fn apply(&mut self, command: TickCommand, now: Instant) {
        match command {
            TickCommand::SetInterval(interval) => {
                if self.paused {
                    self.interval = Some(interval);
                } else if let (Some(old_interval), Some(next_due)) = (self.interval, self.next_due)
                {
                    // Shift the next tick by new - old relative to the last
                    // tick, per spec: changing the interval while running
                    // does not reset the schedule from `now`.
                    let last_tick = next_due - old_interval;
                    self.next_due = Some(last_tick + interval);
                    self.interval = Some(interval);
                } else {
                    self.interval = Some(interval);
                    self.next_due = Some(now + interval);
                }
            }
            TickCommand::Pause => self.paused = true,
            TickCommand::Resume => {
                self.paused = false;
                if self.next_due.is_none() {
                    if let Some(interval) = self.interval {
                        self.next_due = Some(now + interval);
                    }
                }
            }
        }
    }

    /// How long the servicing loop should wait before it needs to check
    /// this clock again. `None` means "no deadline" (no interval
    /// configured yet, or ticking is paused).
    pub fn remaining_until_due(&self, now: Instant) -> Option<Duration> {
        if self.paused {
            return None;
        }
        match self.next_due {
            Some(due) => Some(due.saturating_duration_since(now)),
            None => None,
        }
    }

    /// If a tick is due, fire it and reschedule relative to `now` — not the
    /// nominal due time, so a late wake-up never tries to catch up on
    /// missed ticks. Returns the instant passed to the caller's tick
    /// handler when a tick fires.
    pub fn fire_if_due(&mut self, now: Instant) -> Option<Instant> {
        if self.paused {
            return None;
        }
        let interval = self.interval?;
        let due = self.next_due?;
        if now < due {
            return None;
        }
        self.next_due = Some(now + interval);
        Some(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_interval_means_no_deadline() {
        let clock = TickClock::new();
        assert_eq!(clock.remaining_until_due(Instant::now()), None);
    }

    #[test]
    fn fires_once_the_interval_elapses_and_reschedules_from_now() {
        let mut clock = TickClock::new();
        let t0 = Instant::now();
        clock.apply(TickCommand::SetInterval(Duration::from_millis(10)), t0);
        assert!(clock.fire_if_due(t0).is_none());
        let late = t0 + Duration::from_millis(50);
        assert!(clock.fire_if_due(late).is_some());
        // rescheduled from `late`, not from the missed due time, so the
        // very next instant is not also due.
        assert!(clock.fire_if_due(late).is_none());
    }

    #[test]
    fn pause_suspends_without_forgetting_the_interval() {
        let mut clock = TickClock::new();
        let t0 = Instant::now();
        clock.apply(TickCommand::SetInterval(Duration::from_millis(10)), t0);
        clock.apply(TickCommand::Pause, t0);
        assert_eq!(clock.remaining_until_due(t0 + Duration::from_secs(1)), None);
        clock.apply(TickCommand::Resume, t0 + Duration::from_secs(1));
        assert!(clock.remaining_until_due(t0 + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn changing_interval_while_running_shifts_relative_to_last_tick() {
        let mut clock = TickClock::new();
        let t0 = Instant::now();
        clock.apply(TickCommand::SetInterval(Duration::from_millis(100)), t0);
        // next_due = t0 + 100ms; shrink the interval to 10ms, the next due
        // time should become t0 + 10ms (last_tick=t0, + new interval).
        clock.apply(TickCommand::SetInterval(Duration::from_millis(10)), t0);
        let remaining = clock.remaining_until_due(t0).unwrap();
        assert_eq!(remaining, Duration::from_millis(10));
    }
}
