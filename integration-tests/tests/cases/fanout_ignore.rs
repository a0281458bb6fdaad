// SPDX-License-Identifier: GPL-3.0-or-later

//! Same shape as the RAISE fan-out scenario, but the smaller output uses
//! IGNORE — it never sees the overflow as an event at all, so no terminal
//! ever lands for it, while the larger output still finishes cleanly.

use conduit_core::buffer::{Buffer, Observable, Publishable, ThreadBuffer};
use conduit_core::error::ConduitError;
use conduit_core::multicaster::Multicaster;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::runner::{RunnerControl, ThreadRunner};
use conduit_core::timeout::Timeout;
use std::time::Duration;

#[test]
fn the_ignoring_output_drops_the_overflow_silently_while_the_other_completes_cleanly() {
    let input: Buffer<i32> = ThreadBuffer::new("fanout-ignore-in", 10, false);
    let (command_buffer, status_publisher, status_subscription) = ThreadRunner::<Multicaster<i32>, ()>::channels("mc-ignore");
    let multicaster = Multicaster::new("mc-ignore", input.clone(), status_publisher.clone(), command_buffer.clone());

    let small: Buffer<i32> = ThreadBuffer::new("small", 3, false);
    let large: Buffer<i32> = ThreadBuffer::new("large", 5, false);
    multicaster.subscribe(small.clone(), UnexpectedSituationPolicy::Ignore).unwrap();
    multicaster.subscribe(large.clone(), UnexpectedSituationPolicy::Raise).unwrap();

    let mut small_sub = small.subscribe(None).unwrap();
    let mut large_sub = large.subscribe(None).unwrap();

    let mut runner = ThreadRunner::new(
        "mc-ignore",
        multicaster,
        command_buffer,
        status_publisher,
        status_subscription,
    );
    runner.start_blocking(Some(Duration::from_secs(1))).unwrap();

    let mut publisher = input.publish().unwrap();
    for i in 0..4 {
        publisher
            .publish_value(i, Timeout::After(Duration::from_secs(1)), UnexpectedSituationPolicy::Raise)
            .unwrap();
    }
    publisher
        .publish_complete(None, Timeout::After(Duration::from_secs(1)), UnexpectedSituationPolicy::Raise)
        .unwrap();

    // No one drains `small` until every push has already been attempted, so
    // the 4th value and the terminal both find it saturated.
    std::thread::sleep(Duration::from_millis(150));
    runner.exit().unwrap();

    let mut small_seen = Vec::new();
    for _ in 0..3 {
        small_sub.call_events(|item| small_seen.push(item)).unwrap();
    }
    assert_eq!(small_seen.len(), 3, "expected exactly 3 values, no terminal: {small_seen:?}");
    for (i, item) in small_seen.iter().enumerate() {
        assert_eq!(item.clone().value(), Some(i as i32));
    }
    assert!(matches!(small_sub.call_events(|_| {}), Err(ConduitError::Empty { .. })));

    let mut large_seen = Vec::new();
    for _ in 0..5 {
        large_sub.call_events(|item| large_seen.push(item)).unwrap();
    }
    assert_eq!(large_seen.len(), 5);
    for (i, item) in large_seen[..4].iter().enumerate() {
        assert_eq!(item.clone().value(), Some(i as i32));
    }
    assert!(large_seen[4].is_complete());
    assert!(large_seen[4].clone().complete_error().is_none());
}
