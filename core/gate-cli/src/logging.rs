//! Tracing setup.
//!
//! `watch` and `ask` log to a daily file in the exchange directory so log
//! lines do not interleave with the terminal popup. Short-lived commands log
//! to stderr. `RUST_LOG` selects the filter; `REVIEW_GATE_DEBUG_LOG=1` forces
//! debug.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "REVIEW_GATE_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "review_gate_bridge.log";

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Logs to `<dir>/review_gate_bridge.log.<date>`. Falls back to stderr if the
/// directory cannot be created. Keep the guard alive until exit.
pub fn init_file(dir: &Path) -> Option<WorkerGuard> {
    if let Err(err) = fs_err::create_dir_all(dir) {
        init_stderr();
        tracing::warn!(error = %err, "Log directory unavailable; logging to stderr");
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
}
