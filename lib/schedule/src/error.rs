//! Error types for schedule evaluation.
//!
//! All of these are validation-class failures over tenant-authored
//! configuration; callers log them and skip the workflow for the current
//! invocation rather than failing the batch.

use std::fmt;

/// Errors from schedule and delivery-window evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCron { expression: String, reason: String },
    /// A time of day that does not parse as `HH:MM`.
    InvalidTime { time: String },
    /// A weekday name that does not parse.
    InvalidWeekday { day: String },
    /// An unknown IANA timezone name.
    InvalidTimezone { timezone: String },
    /// A schedule config missing a field its kind requires.
    IncompleteConfig { reason: String },
    /// Evaluation could not produce a result.
    EvaluationFailed { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCron { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTime { time } => write!(f, "invalid time of day: {time:?}"),
            Self::InvalidWeekday { day } => write!(f, "invalid weekday name: {day:?}"),
            Self::InvalidTimezone { timezone } => {
                write!(f, "invalid timezone: {timezone}")
            }
            Self::IncompleteConfig { reason } => {
                write!(f, "incomplete schedule config: {reason}")
            }
            Self::EvaluationFailed { reason } => {
                write!(f, "schedule evaluation failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = ScheduleError::InvalidCron {
            expression: "* * *".to_string(),
            reason: "expected 5 fields, got 3".to_string(),
        };
        assert!(err.to_string().contains("* * *"));
        assert!(err.to_string().contains("5 fields"));

        let err = ScheduleError::InvalidTimezone {
            timezone: "America/Portlandia".to_string(),
        };
        assert!(err.to_string().contains("America/Portlandia"));
    }
}
