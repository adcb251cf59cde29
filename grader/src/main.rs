//! Scenario suites for the hetsync primitives.
//!
//! Runs every case, or only those named on the command line, against the
//! offload backend selected by the configuration (see [`config`]).

mod completion;
mod config;
mod ticket_lock;

use anyhow::Context;
use config::GraderConfig;
use grading::TestDriver;

fn main() -> anyhow::Result<()> {
    grading::logging::init();

    let config = GraderConfig::load().context("failed to load grader configuration")?;
    tracing::info!(?config, "starting scenario suites");
    config::install(config);

    let filter = std::env::args().skip(1).collect::<Vec<_>>();
    let summary = TestDriver::start(
        [
            // FairLock
            &ticket_lock::message_count,
            &ticket_lock::mutual_exclusion,
            &ticket_lock::fifo_admission,
            &ticket_lock::unique_tickets,
            &ticket_lock::early_return_releases,
            &ticket_lock::wrap_around,
            &ticket_lock::try_acquire_contended,
            &ticket_lock::every_backend,
            // CompletionFlag
            &completion::message_42,
            &completion::visibility_trials,
            &completion::many_waiters,
            &completion::wait_before_launch,
        ],
        &filter,
    );
    std::process::exit(summary.exit_code())
}
