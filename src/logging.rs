//! Tracing setup: console, an activity log and a failure log.

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::Paths;
use crate::error::ConfigError;

/// Keeps the file writers alive; dropping it flushes pending log lines.
pub struct LogGuards {
    _activity: WorkerGuard,
    _failures: WorkerGuard,
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), ConfigError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = path.file_name().ok_or_else(|| ConfigError::InvalidValue {
        key: "log path".to_string(),
        message: format!("{} has no file name", path.display()),
    })?;
    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::never(dir, file_name),
    ))
}

/// Install the global subscriber.
///
/// Console honours `RUST_LOG` (default `info`). The activity log receives
/// INFO and above, the failure log ERROR only. Both are append-only with a
/// timestamp on every line.
pub fn init(paths: &Paths) -> Result<LogGuards, ConfigError> {
    let (activity, activity_guard) = file_writer(&paths.activity_log)?;
    let (failures, failures_guard) = file_writer(&paths.failure_log)?;

    let console = fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    let activity_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(activity)
        .with_filter(LevelFilter::INFO);
    let failure_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(failures)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(console)
        .with(activity_layer)
        .with(failure_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            key: "tracing subscriber".to_string(),
            message: e.to_string(),
        })?;

    install_panic_hook();

    Ok(LogGuards {
        _activity: activity_guard,
        _failures: failures_guard,
    })
}

/// Route panics through tracing, with the backtrace captured at the panic site.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %info, "Unexpected panic\n{backtrace}");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_writer_creates_parent_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/master_log.txt");
        let (_writer, _guard) = file_writer(&path).unwrap();
        assert!(tmp.path().join("logs").is_dir());
    }
}
