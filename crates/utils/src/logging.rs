//! provides logging helpers

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Env var naming an optional log file; logs always go to stderr as well.
pub const LOG_PATH_ENV_VAR: &str = "SIDECAR_INITIALIZER_LOG_PATH";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let file = env::var(LOG_PATH_ENV_VAR)
        .ok()
        .and_then(|log_path| rolling_appender(Path::new(&log_path)));

    match file {
        Some(appender) => {
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(file_guard)
        }
        None => {
            registry().with(stderr_layer).init();
            None
        }
    }
}

fn rolling_appender(log_path: &Path) -> Option<RollingFileAppender> {
    let directory = log_path.parent()?;
    let prefix = log_path.file_name()?.to_str()?;

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(directory)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("failed to create log file appender at {}: {e}", log_path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_appender_rejects_bare_root() {
        assert!(rolling_appender(Path::new("/")).is_none());
    }
}
