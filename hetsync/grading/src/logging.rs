//! Logging setup for suite binaries.
//!
//! Filters come from the `HETSYNC_LOG` environment variable, using the
//! `tracing-subscriber` directive syntax (`info`, `hetsync=trace`, ...).
//! The default level is `info`. Output goes to stderr so that it does not
//! interleave with the `test ... ok` lines on stdout.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// ENV used to set the log filter.
pub const FILTER_ENV: &str = "HETSYNC_LOG";

/// Default log level.
const DEFAULT_FILTER_LEVEL: &str = "info";

static INIT: Once = Once::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_target(true);
        // Another subscriber may already be installed, e.g. by a test harness.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialized twice without panicking");
    }
}
