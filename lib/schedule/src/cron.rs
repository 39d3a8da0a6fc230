//! A 5-field cron matcher for custom schedule cadences.
//!
//! Fields are minute, hour, day-of-month, month, day-of-week, each accepting
//! `*`, comma lists, `a-b` ranges and `/n` steps. All five fields are ANDed.
//! Matching is exact to the minute: there is no tolerance window for custom
//! cron cadences, unlike the fixed daily/weekly/monthly kinds.

use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// A parsed cron expression.
///
/// Day-of-week numbering is 0 = Sunday through 6 = Saturday, with 7 accepted
/// as another spelling of Sunday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: [bool; 60],
    hours: [bool; 24],
    days_of_month: [bool; 32],
    months: [bool; 13],
    days_of_week: [bool; 7],
}

impl CronExpr {
    /// Parses a 5-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not have exactly five
    /// whitespace-separated fields or any field fails to parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        }

        let minutes = parse_field(parts[0], 0, 59).map_err(|e| invalid(format!("minute: {e}")))?;
        let hours = parse_field(parts[1], 0, 23).map_err(|e| invalid(format!("hour: {e}")))?;
        let days_of_month =
            parse_field(parts[2], 1, 31).map_err(|e| invalid(format!("day of month: {e}")))?;
        let months = parse_field(parts[3], 1, 12).map_err(|e| invalid(format!("month: {e}")))?;
        let raw_dow =
            parse_field(parts[4], 0, 7).map_err(|e| invalid(format!("day of week: {e}")))?;

        let mut expr = Self {
            minutes: [false; 60],
            hours: [false; 24],
            days_of_month: [false; 32],
            months: [false; 13],
            days_of_week: [false; 7],
        };
        fill(&mut expr.minutes, &minutes);
        fill(&mut expr.hours, &hours);
        fill(&mut expr.days_of_month, &days_of_month);
        fill(&mut expr.months, &months);
        // 7 is Sunday, same as 0.
        let dow: Vec<u32> = raw_dow.into_iter().map(|d| d % 7).collect();
        fill(&mut expr.days_of_week, &dow);

        Ok(expr)
    }

    /// Whether the expression matches the given instant, to the minute.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes[at.minute() as usize]
            && self.hours[at.hour() as usize]
            && self.days_of_month[at.day() as usize]
            && self.months[at.month() as usize]
            && self.days_of_week[at.weekday().num_days_from_sunday() as usize]
    }
}

fn fill(set: &mut [bool], values: &[u32]) {
    for &v in values {
        set[v as usize] = true;
    }
}

/// Parses one cron field into the list of values it allows.
fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
    let mut values = Vec::new();
    for segment in field.split(',') {
        let (base, step) = match segment.split_once('/') {
            Some((base, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| format!("invalid step {step_str:?}"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (base, step)
            }
            None => (segment, 1),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            let a: u32 = a.parse().map_err(|_| format!("invalid value {a:?}"))?;
            let b: u32 = b.parse().map_err(|_| format!("invalid value {b:?}"))?;
            if a > b {
                return Err(format!("range {a}-{b} runs backwards"));
            }
            (a, b)
        } else {
            let a: u32 = base
                .parse()
                .map_err(|_| format!("invalid value {base:?}"))?;
            // A bare value with a step means "from here to the end".
            if step > 1 { (a, max) } else { (a, a) }
        };

        if start < min || end > max {
            return Err(format!("value out of range {min}-{max}"));
        }
        values.extend((start..=end).step_by(step as usize));
    }
    Ok(values)
}
