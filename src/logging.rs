//! Logging setup for the client binary.
//!
//! Two outputs:
//! - stderr, filtered by `RUST_LOG` (default `info`, or `debug` when verbose)
//! - optionally `<log_dir>/client.<date>.log` at INFO, rotated daily, 14 files kept

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{ClientError, Result};

pub const LOG_FILE_PREFIX: &str = "client";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const MAX_LOG_FILES: usize = 14;

/// Keeps the file writer alive. Dropping it flushes pending records.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn console_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// Fails if the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<LoggingGuard> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter(verbose));

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(MAX_LOG_FILES)
                .build(dir)
                .map_err(|e| ClientError::Logging(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::INFO);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ClientError::Logging(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_naming_constants() {
        assert_eq!(LOG_FILE_PREFIX, "client");
        assert_eq!(LOG_FILE_SUFFIX, "log");
        assert_eq!(MAX_LOG_FILES, 14);
    }

    #[test]
    fn second_init_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_logging(false, Some(dir.path()));
        let second = init_logging(false, None);
        // Only one global subscriber may exist per process.
        assert!(first.is_ok());
        assert!(matches!(second, Err(ClientError::Logging(_))));
    }
}
