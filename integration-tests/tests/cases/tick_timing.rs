// SPDX-License-Identifier: GPL-3.0-or-later

//! A Runnable ticking at a 20ms interval produces a steady stream of ticks
//! — no catch-up bursts, no tick sooner than half the configured interval.

use conduit_core::buffer::{Buffer, Observable, ThreadBuffer};
use conduit_core::command::Command;
use conduit_core::error::ConduitError;
use conduit_core::event::Event;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::runnable::{MultiBufferServicingLoop, RunnableBase, Runnable, SubscriberId, TickCommand};
use conduit_core::runner::{RunnerControl, ThreadRunner};
use conduit_core::scope::ScopedAttributes;
use conduit_core::timeout::Timeout;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const TICK_INTERVAL: Duration = Duration::from_millis(20);
const TARGET_TICKS: usize = 60;

/// A Runnable with no real inputs, driven purely by its own tick clock. It
/// subscribes to an idle buffer nobody ever publishes to just to keep the
/// servicing loop's "every input is done" exit condition from tripping
/// vacuously with zero inputs registered.
struct TickProbe {
    base: RunnableBase<()>,
    idle_input: Buffer<()>,
    ticks: Arc<Mutex<Vec<Instant>>>,
}

impl ScopedAttributes for TickProbe {}

impl Runnable for TickProbe {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn execute(&mut self) -> Result<(), ConduitError> {
        let wake = Event::new();
        let command_subscription = self.base.command_buffer().subscribe(Some(wake.clone()))?;
        let idle_subscription = self.idle_input.subscribe(Some(wake.clone()))?;
        let mut loop_ = MultiBufferServicingLoop::new(command_subscription, wake);
        loop_.add_input(idle_subscription, SubscriberId(0), |_value: ()| {}, |_err| Ok(()));

        let mut stop_session = self.base.command_buffer().publish()?;
        let ticks = self.ticks.clone();
        loop_.on_tick(move |now| {
            let mut recorded = ticks.lock().unwrap_or_else(|e| e.into_inner());
            recorded.push(now);
            if recorded.len() >= TARGET_TICKS {
                drop(recorded);
                let _ = stop_session.publish_value(Command::Stop, Timeout::NoWait, UnexpectedSituationPolicy::Ignore);
            }
        });

        self.base
            .send_self(Command::Tick(TickCommand::SetInterval(TICK_INTERVAL)), Timeout::Infinite)?;

        loop_.run()
    }
}

#[test]
fn tick_interval_stays_within_tolerance_over_many_ticks() {
    let idle_input: Buffer<()> = ThreadBuffer::new("tick-idle", 1, false);
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let (command_buffer, status_publisher, status_subscription) = ThreadRunner::<TickProbe, ()>::channels("tick-probe");
    let probe = TickProbe {
        base: RunnableBase::new("tick-probe", status_publisher.clone(), command_buffer.clone()),
        idle_input,
        ticks: ticks.clone(),
    };
    let mut runner = ThreadRunner::new("tick-probe", probe, command_buffer, status_publisher, status_subscription);
    runner.start_blocking(Some(Duration::from_secs(1))).unwrap();
    runner.join(Timeout::After(Duration::from_secs(10))).unwrap();
    runner.check_for_exceptions().unwrap();

    let recorded = ticks.lock().unwrap_or_else(|e| e.into_inner());
    assert!(
        recorded.len() >= TARGET_TICKS,
        "expected at least {TARGET_TICKS} ticks, got {}",
        recorded.len()
    );

    let intervals: Vec<Duration> = recorded.windows(2).map(|pair| pair[1].duration_since(pair[0])).collect();
    let total: Duration = intervals.iter().sum();
    let mean = total / intervals.len() as u32;
    assert!(
        mean >= Duration::from_micros(19_900) && mean <= Duration::from_millis(25),
        "mean tick interval out of range: {mean:?}"
    );

    let min = *intervals.iter().min().unwrap();
    assert!(min >= Duration::from_micros(9_900), "a tick fired too soon after its predecessor: {min:?}");
}
