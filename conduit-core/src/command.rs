// SPDX-License-Identifier: GPL-3.0-or-later

//! Control-plane messages sent from a `Runner` into the scope it started.
//!
//! `Command` is deliberately separate from `Item`: it travels over the
//! control channel the runner keeps for itself, never through a `Buffer`,
//! so a full output buffer can never delay delivery of a stop request.

use crate::runnable::tick::TickCommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent to a running `Runnable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Ask the runnable to finish its current tick and exit its servicing
    /// loop. Not a kill: the loop still drains pending input and still
    /// delivers `Complete` to every subscriber before the worker scope
    /// exits.
    Stop,
    /// Invoke a method on the runnable from outside its own scope and wait
    /// for the matching `Status::InvokeResult { call_id, .. }`.
    ///
    /// `call_id` is chosen by the caller and echoed back unchanged so a
    /// caller juggling several in-flight calls can match replies.
    Invoke {
        call_id: u64,
        method: String,
        args: Value,
    },
    /// Mutate the servicing loop's optional tick clock. Travels through the
    /// same command channel as `Stop`/`Invoke` so ticking state is only
    /// ever touched by the loop itself.
    Tick(TickCommand),
}

impl Command {
    /// `true` for `Stop`.
    pub fn is_stop(&self) -> bool {
        matches!(self, Command::Stop)
    }
}
