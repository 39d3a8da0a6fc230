//! Schedule cadence evaluation: should a schedule-triggered workflow fire now?
//!
//! The batch worker invokes this on every tick. Idempotency across overlapping
//! or repeated invocations comes from the once-per-day rule: a workflow whose
//! `last_run_at` falls on today's UTC date never fires again today.

use crate::cron::CronExpr;
use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// How many minutes either side of the configured time still count as "now".
/// Custom cron cadences do not get this tolerance; they match exact minutes.
const TOLERANCE_MINUTES: u32 = 2;

/// The cadence kind of a schedule trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

/// A workflow's schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "type")]
    pub kind: ScheduleKind,
    /// Time of day (`HH:MM`, 24h) for the fixed cadence kinds.
    #[serde(default)]
    pub time: Option<String>,
    /// ISO weekday numbers (Monday = 1) for the weekly kind.
    #[serde(default)]
    pub days: Vec<u8>,
    /// Days of month for the monthly kind.
    #[serde(default)]
    pub dates: Vec<u8>,
    /// 5-field cron expression for the custom kind.
    #[serde(default)]
    pub cron: Option<String>,
}

impl ScheduleConfig {
    /// Decides whether this schedule should fire at `now`, given the
    /// workflow's last run.
    ///
    /// # Errors
    ///
    /// Returns an error when the config is incomplete for its kind or a
    /// field fails to parse. Callers treat this as a validation failure and
    /// skip the workflow for this invocation.
    pub fn should_fire(
        &self,
        last_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        // Once per UTC calendar day, regardless of kind.
        if let Some(last) = last_run_at {
            if last.date_naive() == now.date_naive() {
                return Ok(false);
            }
        }

        match self.kind {
            ScheduleKind::Custom => {
                let Some(cron) = self.cron.as_deref() else {
                    return Err(ScheduleError::IncompleteConfig {
                        reason: "custom schedule without a cron expression".to_string(),
                    });
                };
                Ok(CronExpr::parse(cron)?.matches(now))
            }
            ScheduleKind::Daily => Ok(self.time_matches(now)?),
            ScheduleKind::Weekly => {
                let weekday = now.weekday().number_from_monday() as u8;
                Ok(self.time_matches(now)? && self.days.contains(&weekday))
            }
            ScheduleKind::Monthly => {
                let day = now.day() as u8;
                Ok(self.time_matches(now)? && self.dates.contains(&day))
            }
        }
    }

    /// Whether `now` is within the tolerance window of the configured time.
    /// The minute-of-day distance wraps midnight, which also covers the
    /// hour-boundary carry (23:59 against a 00:00 target).
    fn time_matches(&self, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        let Some(time) = self.time.as_deref() else {
            return Err(ScheduleError::IncompleteConfig {
                reason: "schedule without a time of day".to_string(),
            });
        };
        let (hour, minute) = parse_time(time)?;
        let target = hour * 60 + minute;
        let current = now.hour() * 60 + now.minute();
        let forward = (1440 + current - target) % 1440;
        let distance = forward.min(1440 - forward);
        Ok(distance <= TOLERANCE_MINUTES)
    }
}

/// Parses a 24h `HH:MM` time of day.
pub(crate) fn parse_time(time: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTime {
        time: time.to_string(),
    };
    let (hour_str, minute_str) = time.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour_str.parse().map_err(|_| invalid())?;
    let minute: u32 = minute_str.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}
