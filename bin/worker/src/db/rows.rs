//! Row types bridging database rows and engine types.

use chrono::{DateTime, Utc};
use copper_spaniel_engine::execution::{ExecutionStatus, PauseReason, WorkflowExecution};
use copper_spaniel_engine::segment::Segment;
use copper_spaniel_engine::step::WorkflowStep;
use copper_spaniel_engine::store::{Record, RecordRef};
use copper_spaniel_engine::workflow::{Workflow, WorkflowStatus};
use copper_spaniel_engine::LogEvent;
use sqlx::FromRow;
use std::str::FromStr;

pub(crate) fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

fn parse_id<T>(raw: &str, what: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| decode_error(format!("invalid {what} '{raw}': {e}")))
}

fn parse_workflow_status(raw: &str) -> Result<WorkflowStatus, sqlx::Error> {
    match raw {
        "active" => Ok(WorkflowStatus::Active),
        "inactive" => Ok(WorkflowStatus::Inactive),
        "deleted" => Ok(WorkflowStatus::Deleted),
        other => Err(decode_error(format!("invalid workflow status '{other}'"))),
    }
}

pub(crate) fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::Completed => "completed",
    }
}

fn parse_execution_status(raw: &str) -> Result<ExecutionStatus, sqlx::Error> {
    match raw {
        "running" => Ok(ExecutionStatus::Running),
        "paused" => Ok(ExecutionStatus::Paused),
        "completed" => Ok(ExecutionStatus::Completed),
        other => Err(decode_error(format!("invalid execution status '{other}'"))),
    }
}

pub(crate) fn pause_reason_str(reason: PauseReason) -> &'static str {
    match reason {
        PauseReason::Wait => "wait",
        PauseReason::OutsideWindow => "outside_window",
    }
}

fn parse_pause_reason(raw: &str) -> Result<PauseReason, sqlx::Error> {
    match raw {
        "wait" => Ok(PauseReason::Wait),
        "outside_window" => Ok(PauseReason::OutsideWindow),
        other => Err(decode_error(format!("invalid pause reason '{other}'"))),
    }
}

pub(crate) fn log_event_str(event: LogEvent) -> &'static str {
    match event {
        LogEvent::Enrollment => "enrollment",
        LogEvent::Pause => "pause",
        LogEvent::Reschedule => "reschedule",
        LogEvent::Resume => "resume",
        LogEvent::Completion => "completion",
    }
}

/// Row type for workflow queries.
#[derive(FromRow)]
pub(crate) struct WorkflowRow {
    id: String,
    tenant_id: String,
    name: String,
    record_type: String,
    status: String,
    trigger: serde_json::Value,
    settings: serde_json::Value,
    suppression_segment_ids: serde_json::Value,
    enrolled_count: i64,
    completed_count: i64,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub(crate) fn try_into_workflow(self) -> Result<Workflow, sqlx::Error> {
        let trigger = serde_json::from_value(self.trigger)
            .map_err(|e| decode_error(format!("invalid workflow trigger: {e}")))?;
        let settings = serde_json::from_value(self.settings)
            .map_err(|e| decode_error(format!("invalid workflow settings: {e}")))?;
        let suppression_segment_ids = serde_json::from_value(self.suppression_segment_ids)
            .map_err(|e| decode_error(format!("invalid suppression segment ids: {e}")))?;

        Ok(Workflow {
            id: parse_id(&self.id, "workflow id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            name: self.name,
            record_type: self.record_type,
            status: parse_workflow_status(&self.status)?,
            trigger,
            settings,
            suppression_segment_ids,
            enrolled_count: self.enrolled_count,
            completed_count: self.completed_count,
            last_run_at: self.last_run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for step queries.
#[derive(FromRow)]
pub(crate) struct StepRow {
    id: String,
    workflow_id: String,
    tenant_id: String,
    parent_step_id: Option<String>,
    branch_path: Option<String>,
    position: i32,
    action: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl StepRow {
    pub(crate) fn try_into_step(self) -> Result<WorkflowStep, sqlx::Error> {
        let parent_step_id = self
            .parent_step_id
            .as_deref()
            .map(|raw| parse_id(raw, "parent step id"))
            .transpose()?;
        let action = serde_json::from_value(self.action)
            .map_err(|e| decode_error(format!("invalid step action: {e}")))?;

        Ok(WorkflowStep {
            id: parse_id(&self.id, "step id")?,
            workflow_id: parse_id(&self.workflow_id, "workflow id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            parent_step_id,
            branch_path: self.branch_path,
            position: self.position,
            action,
            created_at: self.created_at,
        })
    }
}

/// Row type for execution queries.
#[derive(FromRow)]
pub(crate) struct ExecutionRow {
    id: String,
    tenant_id: String,
    workflow_id: String,
    record_id: String,
    record_type: String,
    status: String,
    current_step_id: String,
    resume_at: Option<DateTime<Utc>>,
    pause_reason: Option<String>,
    enrolled_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    pub(crate) fn try_into_execution(self) -> Result<WorkflowExecution, sqlx::Error> {
        let pause_reason = self
            .pause_reason
            .as_deref()
            .map(parse_pause_reason)
            .transpose()?;

        Ok(WorkflowExecution {
            id: parse_id(&self.id, "execution id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            workflow_id: parse_id(&self.workflow_id, "workflow id")?,
            record_id: parse_id(&self.record_id, "record id")?,
            record_type: self.record_type,
            status: parse_execution_status(&self.status)?,
            current_step_id: parse_id(&self.current_step_id, "step id")?,
            resume_at: self.resume_at,
            pause_reason,
            enrolled_at: self.enrolled_at,
            completed_at: self.completed_at,
        })
    }
}

/// Row type for segment queries.
#[derive(FromRow)]
pub(crate) struct SegmentRow {
    id: String,
    tenant_id: String,
    name: String,
    record_type: Option<String>,
    rule: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl SegmentRow {
    pub(crate) fn try_into_segment(self) -> Result<Segment, sqlx::Error> {
        let rule = serde_json::from_value(self.rule)
            .map_err(|e| decode_error(format!("invalid segment rule: {e}")))?;

        Ok(Segment {
            id: parse_id(&self.id, "segment id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            name: self.name,
            record_type: self.record_type,
            rule,
            created_at: self.created_at,
        })
    }
}

/// Row type for record queries.
#[derive(FromRow)]
pub(crate) struct RecordRow {
    id: String,
    tenant_id: String,
    record_type: String,
    attributes: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    pub(crate) fn try_into_record(self) -> Result<Record, sqlx::Error> {
        Ok(Record {
            id: parse_id(&self.id, "record id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            record_type: self.record_type,
            attributes: self.attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for bulk record reference queries.
#[derive(FromRow)]
pub(crate) struct RecordRefRow {
    id: String,
    record_type: String,
}

impl RecordRefRow {
    pub(crate) fn try_into_ref(self) -> Result<RecordRef, sqlx::Error> {
        Ok(RecordRef {
            id: parse_id(&self.id, "record id")?,
            record_type: self.record_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
        ] {
            assert_eq!(
                parse_execution_status(execution_status_str(status)).unwrap(),
                status
            );
        }
        assert_eq!(
            parse_workflow_status("active").unwrap(),
            WorkflowStatus::Active
        );
        assert_eq!(
            parse_workflow_status("deleted").unwrap(),
            WorkflowStatus::Deleted
        );
        for reason in [PauseReason::Wait, PauseReason::OutsideWindow] {
            assert_eq!(parse_pause_reason(pause_reason_str(reason)).unwrap(), reason);
        }
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let error = parse_execution_status("cancelled").unwrap_err();
        assert!(matches!(error, sqlx::Error::Decode(_)));
    }

    #[test]
    fn log_event_strings_match_audit_trail_values() {
        assert_eq!(log_event_str(LogEvent::Reschedule), "reschedule");
        assert_eq!(log_event_str(LogEvent::Enrollment), "enrollment");
    }
}
