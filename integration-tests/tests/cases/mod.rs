// SPDX-License-Identifier: GPL-3.0-or-later

mod cross_process_error;
mod discard_reclaim;
mod fanout_ignore;
mod fanout_raise;
mod thread_pipeline;
mod tick_timing;
