// SPDX-License-Identifier: GPL-3.0-or-later

//! Three processes chained by cross-process buffers (source -> forward ->
//! sink). The source raises partway through; the sink's owner observes that
//! failure through `check_for_exceptions()`.

use crate::fixtures::worker::{spawn_worker, TEST_TIMEOUT};
use conduit_core::error::ConduitError;
use conduit_core::runner::RunnerControl;
use std::time::{Duration, Instant};

const COUNT: i32 = 10;

#[test]
fn a_source_side_error_is_observed_by_the_sink_owner() {
    let (source_to_forward, addr_source_to_forward) = conduit_ipc::host::<i32>("source-to-forward", 10, false).unwrap();
    let (forward_to_sink, addr_forward_to_sink) = conduit_ipc::host::<i32>("forward-to-sink", 10, false).unwrap();

    let mut sink = spawn_worker(
        "sink",
        &[
            ("CONDUIT_TEST_ROLE", "sink"),
            ("CONDUIT_TEST_INPUT_ADDR", &addr_forward_to_sink.to_string()),
        ],
    );
    let mut forward = spawn_worker(
        "forward",
        &[
            ("CONDUIT_TEST_ROLE", "forward"),
            ("CONDUIT_TEST_INPUT_ADDR", &addr_source_to_forward.to_string()),
            ("CONDUIT_TEST_OUTPUT_ADDR", &addr_forward_to_sink.to_string()),
        ],
    );
    let mut source = spawn_worker(
        "source",
        &[
            ("CONDUIT_TEST_ROLE", "source"),
            ("CONDUIT_TEST_OUTPUT_ADDR", &addr_source_to_forward.to_string()),
            ("CONDUIT_TEST_COUNT", &COUNT.to_string()),
            ("CONDUIT_TEST_ERROR_AT", &(COUNT / 2).to_string()),
        ],
    );

    let deadline = Instant::now() + TEST_TIMEOUT;
    let mut outcome = sink.check_for_exceptions();
    while outcome.is_ok() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
        outcome = sink.check_for_exceptions();
    }

    match outcome {
        Err(ConduitError::WorkerFailure(message)) => {
            assert!(message.contains("Test Error"), "unexpected message: {message}");
            assert!(
                message.contains("conduit_test_worker"),
                "expected the message to mention the publishing runnable's source file, got: {message}"
            );
        }
        other => panic!("expected the sink to observe a WorkerFailure mentioning Test Error, got {other:?}"),
    }

    let _ = source.exit();
    let _ = forward.exit();
    let _ = sink.exit();
    source_to_forward.exit();
    forward_to_sink.exit();
}
