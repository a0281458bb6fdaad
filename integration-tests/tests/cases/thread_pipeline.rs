// SPDX-License-Identifier: GPL-3.0-or-later

//! A two-item thread-scoped pipeline, no Runnable involved — just a
//! `Buffer<T>` published from one thread and drained from another.

use conduit_core::buffer::{Buffer, Observable, Publishable, ThreadBuffer};
use conduit_core::error::ConduitError;
use conduit_core::item::Item;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::timeout::Timeout;
use std::thread;
use std::time::Duration;

#[test]
fn two_items_then_a_clean_completion_are_observed_in_order() {
    let buffer: Buffer<String> = ThreadBuffer::new("pipeline", 10, false);
    let mut publisher = buffer.publish().unwrap();
    let reader_buffer = buffer.clone();

    let reader = thread::spawn(move || {
        let mut subscription = reader_buffer.subscribe(None).unwrap();
        let mut seen = Vec::new();
        loop {
            match subscription.call_events(|item| seen.push(item)) {
                Ok(()) => {
                    if seen.last().is_some_and(Item::is_complete) {
                        return seen;
                    }
                }
                Err(ConduitError::Empty { .. }) => thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("unexpected error draining pipeline: {e}"),
            }
        }
    });

    publisher
        .publish_value("Hello".to_string(), Timeout::Infinite, UnexpectedSituationPolicy::Raise)
        .unwrap();
    publisher
        .publish_value("World".to_string(), Timeout::Infinite, UnexpectedSituationPolicy::Raise)
        .unwrap();
    publisher
        .publish_complete(None, Timeout::Infinite, UnexpectedSituationPolicy::Raise)
        .unwrap();

    let seen = reader.join().expect("reader thread panicked");
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].clone().value(), Some("Hello".to_string()));
    assert_eq!(seen[1].clone().value(), Some("World".to_string()));
    assert!(seen[2].is_complete());
    assert!(seen[2].complete_error().is_none());
}
