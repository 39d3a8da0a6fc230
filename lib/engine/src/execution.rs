//! Execution state: one record's walk through a workflow's steps.

use chrono::{DateTime, Utc};
use copper_spaniel_core::{ExecutionId, LogId, RecordId, StepId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// A step is queued or in flight.
    Running,
    /// Waiting on a timer or a delivery window to reopen.
    Paused,
    /// Reached the end of the step forest.
    Completed,
}

impl ExecutionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed)
    }

    /// Whether the record still counts as enrolled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Why a paused execution is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// A wait step's timer is running.
    Wait,
    /// The delivery window was closed when the execution came due.
    OutsideWindow,
}

/// One record's execution of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// Tenant that owns the workflow and record.
    pub tenant_id: TenantId,
    /// Workflow being executed.
    pub workflow_id: WorkflowId,
    /// Record walking the steps.
    pub record_id: RecordId,
    /// Type of the enrolled record.
    pub record_type: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// Step the execution is at; on completion, the last step reached.
    pub current_step_id: StepId,
    /// When a paused execution becomes due again.
    pub resume_at: Option<DateTime<Utc>>,
    /// Why the execution is paused, when it is.
    pub pause_reason: Option<PauseReason>,
    /// When the record enrolled.
    pub enrolled_at: DateTime<Utc>,
    /// When the execution completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a running execution positioned at the workflow's first step.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        record_id: RecordId,
        record_type: impl Into<String>,
        first_step_id: StepId,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            tenant_id,
            workflow_id,
            record_id,
            record_type: record_type.into(),
            status: ExecutionStatus::Running,
            current_step_id: first_step_id,
            resume_at: None,
            pause_reason: None,
            enrolled_at,
            completed_at: None,
        }
    }

    /// Move to the next step and return to the running state.
    pub fn advance_to(&mut self, step_id: StepId) {
        self.status = ExecutionStatus::Running;
        self.current_step_id = step_id;
        self.resume_at = None;
        self.pause_reason = None;
    }

    /// Pause until `resume_at` for the given reason.
    pub fn pause(&mut self, reason: PauseReason, resume_at: DateTime<Utc>) {
        self.status = ExecutionStatus::Paused;
        self.resume_at = Some(resume_at);
        self.pause_reason = Some(reason);
    }

    /// Mark the execution completed at `now`.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Completed;
        self.resume_at = None;
        self.pause_reason = None;
        self.completed_at = Some(now);
    }

    /// Whether a paused execution is due to resume at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Paused
            && self.resume_at.is_some_and(|at| at <= now)
    }
}

/// Kind of entry in an execution's audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The record enrolled and the first step was queued.
    Enrollment,
    /// The execution paused on a wait step.
    Pause,
    /// A due execution was pushed back because the delivery window was closed.
    Reschedule,
    /// A paused execution advanced past its wait.
    Resume,
    /// The execution reached the end of the step forest.
    Completion,
}

/// One audit-trail entry for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Unique identifier for this entry.
    pub id: LogId,
    /// Tenant that owns the execution.
    pub tenant_id: TenantId,
    /// Execution this entry belongs to.
    pub execution_id: ExecutionId,
    /// Step the entry refers to, when one is involved.
    pub step_id: Option<StepId>,
    /// What happened.
    pub event: LogEvent,
    /// Event-specific detail, e.g. previous and new resume times.
    pub detail: Value,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    /// Create an audit-trail entry.
    #[must_use]
    pub fn new(
        execution: &WorkflowExecution,
        step_id: Option<StepId>,
        event: LogEvent,
        detail: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogId::new(),
            tenant_id: execution.tenant_id,
            execution_id: execution.id,
            step_id,
            event,
            detail,
            created_at: now,
        }
    }
}
