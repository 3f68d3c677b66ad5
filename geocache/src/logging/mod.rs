//! Logging setup.
//!
//! Installs a `tracing` subscriber writing either to stderr or to a
//! daily-rolled file. `RUST_LOG` takes precedence over the configured level.
//!
//! # Example
//!
//! ```ignore
//! let config = ConfigFile::load()?;
//! let _guard = geocache::logging::init_logging(&config.logging, false)?;
//! ```
//!
//! The returned guard flushes buffered log lines when dropped and must be
//! kept alive for the lifetime of the process.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const TIMESTAMP_FORMAT: &str =
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]";

/// Errors from installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("Invalid timestamp format: {0}")]
    Timestamp(String),

    #[error("Failed to create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the background log writer alive.
#[must_use = "dropping the guard stops log output"]
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Filter directive for the given settings, ignoring `RUST_LOG`.
pub fn default_directive(config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.level.clone()
    }
}

fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = from_env.as_deref().unwrap_or(directive);
    EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber.
///
/// # Arguments
///
/// * `config` - Level and output location
/// * `verbose` - Raise the default level to `debug`
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<LoggingGuard, LoggingError> {
    let filter = build_filter(&default_directive(config, verbose))?;

    let format = time::format_description::parse(TIMESTAMP_FORMAT)
        .map_err(|e| LoggingError::Timestamp(e.to_string()))?;
    let timer = LocalTime::new(format);

    let (writer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_name);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let layer = fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_ansi(config.directory.is_none())
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        directory = ?config.directory,
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _worker: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let config = LoggingConfig::default();
        assert_eq!(default_directive(&config, false), "info");
        assert_eq!(default_directive(&config, true), "debug");
    }

    #[test]
    fn test_timestamp_format_parses() {
        assert!(time::format_description::parse(TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        assert!(build_filter("geocache=debug,warn").is_ok());
    }

    #[test]
    fn test_init_logging_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: Some(dir.path().join("logs")),
            ..Default::default()
        };

        let guard = init_logging(&config, false);
        assert!(guard.is_ok());
        assert!(dir.path().join("logs").is_dir());

        // Second installation is rejected
        assert!(matches!(
            init_logging(&config, false),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
