use std::fmt;

use copper_spaniel_schedule::ScheduleError;

/// Errors from a record store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the backend.
    ConnectionFailed {
        /// Description of the connection failure.
        message: String,
    },
    /// A query or write against the backend failed.
    QueryFailed {
        /// Description of the query failure.
        message: String,
    },
    /// A stored row could not be decoded into its domain type.
    DecodeFailed {
        /// Description of the decode failure.
        message: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed { message } => {
                write!(f, "failed to connect to record store: {message}")
            }
            StoreError::QueryFailed { message } => {
                write!(f, "record store query failed: {message}")
            }
            StoreError::DecodeFailed { message } => {
                write!(f, "failed to decode stored row: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from a queue backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not reach the broker.
    ConnectionFailed {
        /// Description of the connection failure.
        message: String,
    },
    /// A message could not be published.
    PublishFailed {
        /// Description of the publish failure.
        message: String,
    },
    /// Messages could not be pulled from the broker.
    ConsumeFailed {
        /// Description of the consume failure.
        message: String,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::ConnectionFailed { message } => {
                write!(f, "failed to connect to queue: {message}")
            }
            QueueError::PublishFailed { message } => {
                write!(f, "failed to publish message: {message}")
            }
            QueueError::ConsumeFailed { message } => {
                write!(f, "failed to consume messages: {message}")
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Errors surfaced by enrollment and lifecycle operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The record store failed.
    Store(StoreError),
    /// A schedule or delivery window could not be evaluated.
    Schedule(ScheduleError),
    /// A step queue publish failed.
    Queue(QueueError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Store(error) => write!(f, "store error: {error}"),
            EngineError::Schedule(error) => write!(f, "schedule error: {error}"),
            EngineError::Queue(error) => write!(f, "queue error: {error}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(error) => Some(error),
            EngineError::Schedule(error) => Some(error),
            EngineError::Queue(error) => Some(error),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        EngineError::Store(error)
    }
}

impl From<ScheduleError> for EngineError {
    fn from(error: ScheduleError) -> Self {
        EngineError::Schedule(error)
    }
}

impl From<QueueError> for EngineError {
    fn from(error: QueueError) -> Self {
        EngineError::Queue(error)
    }
}
