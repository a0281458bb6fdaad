// SPDX-License-Identifier: GPL-3.0-or-later

//! A cross-process buffer left with no publisher and no subscriber has its
//! queued contents reclaimed once the (longer, cross-process) discard delay
//! has elapsed.

use conduit_core::buffer::{Observable, Publishable};
use conduit_core::error::ConduitError;
use conduit_core::policy::UnexpectedSituationPolicy;
use conduit_core::timeout::Timeout;
use std::time::Duration;

#[test]
fn an_orphaned_cross_process_buffer_is_reclaimed_after_its_discard_delay() {
    let (buffer, _address) = conduit_ipc::host::<i32>("discard-reclaim", 10, false).unwrap();

    let mut publisher = buffer.publish().unwrap();
    publisher
        .publish_value(1, Timeout::NoWait, UnexpectedSituationPolicy::Raise)
        .unwrap();
    publisher
        .publish_value(2, Timeout::NoWait, UnexpectedSituationPolicy::Raise)
        .unwrap();
    publisher.unpublish();

    // Cross-process discard delay is 8s; wait at least 2s past it before
    // checking reclaim.
    std::thread::sleep(Duration::from_secs(10) + Duration::from_millis(500));

    let mut subscription = buffer.subscribe(None).unwrap();
    let result = subscription.call_events(|_| {});
    assert!(matches!(result, Err(ConduitError::Empty { .. })), "expected Empty after reclaim, got {result:?}");
}
