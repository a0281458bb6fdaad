// SPDX-License-Identifier: GPL-3.0-or-later

//! Spawns `conduit-test-worker` child processes for the cross-process
//! scenarios, wired through `ProcessRunner` exactly as an application would
//! use it — nothing here reaches past the public `conduit-ipc` API.

use conduit_core::runner::RunnerControl;
use conduit_ipc::ProcessRunner;
use std::time::Duration;

/// Generous bound for every blocking call a scenario makes against a
/// worker: these are local loopback round-trips, not a real network.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start a child process running `conduit-test-worker` with `env` set
/// beforehand. `env` is expected to include `CONDUIT_TEST_ROLE` and
/// whichever address/count variables that role needs.
///
/// Workers are always spawned sequentially from the test's own thread, so
/// setting process-wide environment variables immediately before each
/// `start_blocking` call is safe: `std::process::Command::spawn` snapshots
/// the parent's environment at spawn time, and no two workers are ever
/// spawned concurrently.
pub fn spawn_worker(name: &str, env: &[(&str, &str)]) -> ProcessRunner<()> {
    let (rendezvous, command_buffer, status_subscription) =
        ProcessRunner::<()>::channels(name).expect("failed to host worker command/status channels");

    for (key, value) in env {
        std::env::set_var(key, value);
    }

    let program = assert_cmd::cargo::cargo_bin("conduit-test-worker");
    let mut runner = ProcessRunner::new(name, program, Vec::new(), rendezvous, command_buffer, status_subscription);
    runner
        .start_blocking(Some(TEST_TIMEOUT))
        .unwrap_or_else(|e| panic!("worker '{name}' failed to start: {e}"));
    runner
}
