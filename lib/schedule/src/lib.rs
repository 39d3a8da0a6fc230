//! Schedule evaluation for the copper-spaniel platform.
//!
//! Two concerns live here: deciding whether a schedule-triggered workflow
//! should fire during the current batch invocation (cadence), and deciding
//! whether "now" falls inside a tenant's configured business hours, with
//! the next allowed instant when it does not (delivery window).

pub mod cadence;
pub mod cron;
pub mod error;
pub mod window;

pub use cadence::{ScheduleConfig, ScheduleKind};
pub use cron::CronExpr;
pub use error::ScheduleError;
pub use window::DeliveryWindow;
