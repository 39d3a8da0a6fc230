//! Domain error types for worker startup and long-running tasks.

use std::fmt;

/// Errors that take the worker down.
///
/// Per-item failures inside a sweep or a consumer batch are logged and
/// counted where they happen; only infrastructure-level failures surface
/// here.
#[derive(Debug)]
pub enum WorkerError {
    /// Configuration could not be loaded.
    ConfigError {
        /// Description of the configuration failure.
        details: String,
    },
    /// The database is unreachable.
    DatabaseUnavailable {
        /// Description of the connection failure.
        details: String,
    },
    /// The message broker is unreachable.
    QueueUnavailable {
        /// Description of the connection failure.
        details: String,
    },
    /// The HTTP API could not start or crashed.
    HttpServerFailed {
        /// Description of the server failure.
        details: String,
    },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { details } => {
                write!(f, "failed to load configuration: {details}")
            }
            Self::DatabaseUnavailable { details } => {
                write!(f, "database unavailable: {details}")
            }
            Self::QueueUnavailable { details } => {
                write!(f, "message broker unavailable: {details}")
            }
            Self::HttpServerFailed { details } => {
                write!(f, "http server failed: {details}")
            }
        }
    }
}

impl std::error::Error for WorkerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        let error = WorkerError::DatabaseUnavailable {
            details: "connection refused".to_owned(),
        };
        assert_eq!(
            error.to_string(),
            "database unavailable: connection refused"
        );
    }
}
