//! Logging setup for runledger binaries.
//!
//! Two sinks share one `EnvFilter`:
//!
//! - JSON lines, rolled daily, under `~/.runledger/logs/` (or `--log-dir`)
//! - compact human-readable output on stderr
//!
//! `RUST_LOG` replaces the default filter entirely. Without it, runledger's
//! own crates log at a level picked from the `-v` count and HTTP request
//! spans from `tower_http` stay at `info`.
//!
//! ```no_run
//! let guard = runledger_core::logging::init_logging(None, 1)?;
//! tracing::debug!(log_dir = %guard.log_dir().display(), "ready");
//! # Ok::<(), runledger_core::CoreError>(())
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{CoreError, Result};

/// Prefix of the daily log files (`runledger.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "runledger.log";

/// Crates whose level follows the verbosity flag.
const OWN_TARGETS: [&str; 6] = [
    "runledger",
    "runledger_api",
    "runledger_config",
    "runledger_core",
    "runledger_cost",
    "runledger_pricing",
];

/// Keeps the file writer alive; pending lines are flushed when dropped.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LogGuard {
    /// Directory the JSON log files are written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Level for runledger's own targets at a given `-v` count.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Default filter directive string for a verbosity.
pub fn default_filter(verbosity: u8) -> String {
    let level = level_for_verbosity(verbosity);
    let mut directives: Vec<String> = OWN_TARGETS.iter().map(|t| format!("{t}={level}")).collect();
    directives.push("tower_http=info".to_string());
    directives.join(",")
}

/// Install the global subscriber.
///
/// Fails if the log directory cannot be created or a subscriber is already
/// installed. Hold the returned guard until shutdown.
pub fn init_logging(log_dir: Option<PathBuf>, verbosity: u8) -> Result<LogGuard> {
    let log_dir = log_dir.unwrap_or_else(default_log_dir);

    std::fs::create_dir_all(&log_dir).map_err(|e| CoreError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let json_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let detailed = verbosity > 0;
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(detailed)
        .with_line_number(detailed)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| CoreError::internal(format!("failed to install tracing subscriber: {e}")))?;

    tracing::debug!(log_dir = %log_dir.display(), verbosity, "Logging initialized");

    Ok(LogGuard {
        _file_guard: file_guard,
        log_dir,
    })
}

/// Console-only subscriber for tests; repeated calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(default_filter(1)))
        .with_test_writer()
        .try_init();
}

/// `~/.runledger`, or `./.runledger` when no home directory can be found.
pub fn runledger_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".runledger")
}

/// `~/.runledger/logs`
pub fn default_log_dir() -> PathBuf {
    runledger_home().join("logs")
}

/// Log a cost ledger event under the `runledger::cost` target.
///
/// ```ignore
/// log_cost_event!(run_id = %run_id, items = 3, "Recorded run costs");
/// ```
#[macro_export]
macro_rules! log_cost_event {
    ($($field:tt)*) => {
        tracing::info!(target: "runledger::cost", $($field)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), "info");
        assert_eq!(level_for_verbosity(1), "debug");
        assert_eq!(level_for_verbosity(4), "trace");
    }

    #[test]
    fn test_default_filter_covers_own_crates() {
        let filter = default_filter(1);
        for target in OWN_TARGETS {
            assert!(filter.contains(&format!("{target}=debug")), "{filter}");
        }
        assert!(filter.ends_with("tower_http=info"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_default_log_dir_under_home() {
        assert!(default_log_dir().ends_with(".runledger/logs"));
    }

    #[test]
    fn test_runledger_home_uses_platform_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(runledger_home(), home.join(".runledger"));
        }
    }

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}
