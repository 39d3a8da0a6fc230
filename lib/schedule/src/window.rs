//! Tenant business-hours policies ("delivery windows").
//!
//! A workflow may restrict when its steps dispatch or resume: a set of
//! allowed weekdays and a time-of-day range, interpreted in the tenant's
//! timezone. The range is half-open, `[start, end)`; an end at or before the
//! start admits nothing. All instants enter and leave as UTC.

use crate::cadence::parse_time;
use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A business-hours policy attached to a workflow's settings.
///
/// A policy with `enabled = false` or an empty day list restricts nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Weekday names, full or three-letter, case-insensitive.
    #[serde(default)]
    pub days: Vec<String>,
    /// Start of the window (`HH:MM`, 24h, tenant-local).
    pub start: String,
    /// End of the window, exclusive.
    pub end: String,
    /// IANA timezone name the window is interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_enabled() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl DeliveryWindow {
    /// Whether `now` falls inside the window.
    ///
    /// # Errors
    ///
    /// Returns an error when the policy's days, times, or timezone fail to
    /// parse; callers log and treat the item as failed for this invocation.
    pub fn is_open(&self, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        if !self.restricts() {
            return Ok(true);
        }
        let tz = self.tz()?;
        let days = self.allowed_days()?;
        let (start, end) = self.bounds()?;

        let local = now.with_timezone(&tz);
        Ok(days.contains(&local.weekday()) && local.time() >= start && local.time() < end)
    }

    /// The next instant at which the window opens, at or after `now`.
    ///
    /// When today is an allowed day and the local time is before the start,
    /// that is today at the start time; otherwise the scan walks forward
    /// day by day to the next allowed weekday. Instants that fall into a DST
    /// gap resolve one hour later.
    ///
    /// # Errors
    ///
    /// Same conditions as [`DeliveryWindow::is_open`].
    pub fn next_open(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        if !self.restricts() {
            return Ok(now);
        }
        let tz = self.tz()?;
        let days = self.allowed_days()?;
        let (start, _) = self.bounds()?;

        let local = now.with_timezone(&tz);
        for offset in 0..=7 {
            let date = local.date_naive() + Duration::days(offset);
            if !days.contains(&date.weekday()) {
                continue;
            }
            if offset == 0 && local.time() >= start {
                continue;
            }
            if let Some(resolved) = resolve_local(tz, date.and_time(start)) {
                return Ok(resolved.with_timezone(&Utc));
            }
        }
        Err(ScheduleError::EvaluationFailed {
            reason: "no allowed instant within the next week".to_string(),
        })
    }

    /// An empty day list or a disabled flag means the policy restricts
    /// nothing.
    pub fn restricts(&self) -> bool {
        self.enabled && !self.days.is_empty()
    }

    fn tz(&self) -> Result<Tz, ScheduleError> {
        self.timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone {
                timezone: self.timezone.clone(),
            })
    }

    fn allowed_days(&self) -> Result<Vec<Weekday>, ScheduleError> {
        self.days
            .iter()
            .map(|day| {
                day.parse().map_err(|_| ScheduleError::InvalidWeekday {
                    day: day.clone(),
                })
            })
            .collect()
    }

    fn bounds(&self) -> Result<(NaiveTime, NaiveTime), ScheduleError> {
        Ok((to_naive_time(&self.start)?, to_naive_time(&self.end)?))
    }
}

fn to_naive_time(time: &str) -> Result<NaiveTime, ScheduleError> {
    let (hour, minute) = parse_time(time)?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| ScheduleError::InvalidTime {
        time: time.to_string(),
    })
}

/// Resolves a tenant-local wall-clock time to an absolute instant, taking
/// the earlier side of an ambiguous fold and stepping an hour past a gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let attempt = |n: NaiveDateTime| tz.from_local_datetime(&n).earliest();
    attempt(naive).or_else(|| attempt(naive + Duration::hours(1)))
}
