// SPDX-License-Identifier: GPL-3.0-or-later

//! A Multicaster fans one input out to a small (capacity 3) and a large
//! (capacity 5) output, both under RAISE. The smaller output overflows on
//! the 4th item; the larger receives every item cleanly.

use conduit_core::buffer::{Buffer, Observable, Publishable, ThreadBuffer};
use conduit_core::error::ConduitError;
use conduit_core::multicaster::Multicaster;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::runner::{RunnerControl, ThreadRunner};
use conduit_core::timeout::Timeout;
use std::thread;
use std::time::Duration;

#[test]
fn the_overflowing_output_gets_a_full_terminal_while_the_other_gets_everything() {
    let input: Buffer<i32> = ThreadBuffer::new("fanout-raise-in", 10, false);
    let (command_buffer, status_publisher, status_subscription) = ThreadRunner::<Multicaster<i32>, ()>::channels("mc-raise");
    let multicaster = Multicaster::new("mc-raise", input.clone(), status_publisher.clone(), command_buffer.clone());

    let small: Buffer<i32> = ThreadBuffer::new("small", 3, false);
    let large: Buffer<i32> = ThreadBuffer::new("large", 5, false);
    multicaster.subscribe(small.clone(), UnexpectedSituationPolicy::Raise).unwrap();
    multicaster.subscribe(large.clone(), UnexpectedSituationPolicy::Raise).unwrap();

    let mut small_sub = small.subscribe(None).unwrap();
    let mut large_sub = large.subscribe(None).unwrap();

    let mut runner = ThreadRunner::new(
        "mc-raise",
        multicaster,
        command_buffer,
        status_publisher,
        status_subscription,
    );
    runner.start_blocking(Some(Duration::from_secs(1))).unwrap();

    let mut publisher = input.publish().unwrap();
    for i in 0..3 {
        publisher
            .publish_value(i, Timeout::After(Duration::from_secs(1)), UnexpectedSituationPolicy::Raise)
            .unwrap();
    }
    // Give the worker thread time to have fanned all three out before the
    // small output is saturated and the fourth item overflows it.
    thread::sleep(Duration::from_millis(100));

    // The slow consumer: starts draining small only after the overflow has
    // had a chance to begin, so the synthesized terminal has room to land
    // within the multicaster's grace window.
    let drainer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(15));
        let mut seen = Vec::new();
        loop {
            match small_sub.call_events(|item| seen.push(item)) {
                Ok(()) => {
                    if seen.last().is_some_and(|item| item.is_complete()) {
                        return seen;
                    }
                }
                Err(ConduitError::Empty { .. }) => thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("unexpected error draining the small output: {e}"),
            }
            if seen.len() > 8 {
                panic!("small output produced more items than the scenario allows: {seen:?}");
            }
        }
    });

    publisher
        .publish_value(3, Timeout::After(Duration::from_secs(1)), UnexpectedSituationPolicy::Raise)
        .unwrap();
    publisher
        .publish_complete(None, Timeout::After(Duration::from_secs(1)), UnexpectedSituationPolicy::Raise)
        .unwrap();

    let small_seen = drainer.join().expect("small-output drainer panicked");
    runner.exit().unwrap();

    assert_eq!(small_seen.len(), 4, "expected 3 values then one terminal: {small_seen:?}");
    for (i, item) in small_seen[..3].iter().enumerate() {
        assert_eq!(item.clone().value(), Some(i as i32));
    }
    match small_seen[3].clone().complete_error() {
        Some(ConduitError::Full { .. }) => {}
        other => panic!("expected the small output's terminal to carry Full, got {other:?}"),
    }

    let mut large_seen = Vec::new();
    for _ in 0..5 {
        large_sub.call_events(|item| large_seen.push(item)).unwrap();
    }
    assert_eq!(large_seen.len(), 5);
    for (i, item) in large_seen[..4].iter().enumerate() {
        assert_eq!(item.clone().value(), Some(i as i32));
    }
    assert!(large_seen[4].is_complete());
}
