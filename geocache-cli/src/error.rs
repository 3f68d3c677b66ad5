//! CLI error types.

use std::fmt;

use geocache::config::ConfigError;
use geocache::coord::CoordError;
use geocache::executor::PoolError;
use geocache::logging::LoggingError;
use geocache::AbortReason;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(ConfigError),

    /// Logging could not be initialized.
    Logging(LoggingError),

    /// Invalid coordinates or bounds.
    Coord(CoordError),

    /// Worker pool could not be created.
    Pool(PoolError),

    /// Failed to create the Tokio runtime.
    RuntimeCreation(String),

    /// The query ended without data.
    QueryAborted(AbortReason),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Coord(e) => write!(f, "Invalid coordinates: {}", e),
            CliError::Pool(e) => write!(f, "Worker pool error: {}", e),
            CliError::RuntimeCreation(msg) => {
                write!(f, "Failed to create Tokio runtime: {}", msg)
            }
            CliError::QueryAborted(reason) => write!(f, "Query aborted: {}", reason),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Coord(e) => Some(e),
            CliError::Pool(e) => Some(e),
            CliError::RuntimeCreation(_) | CliError::QueryAborted(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<CoordError> for CliError {
    fn from(e: CoordError) -> Self {
        CliError::Coord(e)
    }
}

impl From<PoolError> for CliError {
    fn from(e: PoolError) -> Self {
        CliError::Pool(e)
    }
}
