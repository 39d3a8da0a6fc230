//! Execution lifecycle: walking the step forest, pausing, and resuming.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::execution::{ExecutionLog, LogEvent, PauseReason, WorkflowExecution};
use crate::step::WorkflowStep;
use crate::store::RecordStore;
use crate::workflow::Workflow;

/// Drives executions through the step forest against a record store.
pub struct ExecutionLifecycle<S: RecordStore> {
    store: S,
}

impl<S: RecordStore> ExecutionLifecycle<S> {
    /// Create a lifecycle driver backed by `store`.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Find the step that follows `step` in execution order.
    ///
    /// Looks for the next sibling sharing the step's parent and branch path;
    /// when the level is exhausted, climbs parent ids and continues after
    /// each ancestor. Returns `None` once the forest is exhausted. Branch
    /// children are never descended into here; the step executor picks a
    /// branch path when it routes a branch step.
    pub async fn next_step_after(
        &self,
        step: &WorkflowStep,
    ) -> Result<Option<WorkflowStep>, EngineError> {
        if let Some(sibling) = self
            .store
            .next_sibling_step(
                step.tenant_id,
                step.workflow_id,
                step.parent_step_id,
                step.branch_path.as_deref(),
                step.position,
            )
            .await?
        {
            return Ok(Some(sibling));
        }

        let mut parent_id = step.parent_step_id;
        while let Some(id) = parent_id {
            let Some(parent) = self.store.step(step.tenant_id, id).await? else {
                tracing::warn!(step_id = %id, "parent step missing while walking steps");
                return Ok(None);
            };
            if let Some(sibling) = self
                .store
                .next_sibling_step(
                    parent.tenant_id,
                    parent.workflow_id,
                    parent.parent_step_id,
                    parent.branch_path.as_deref(),
                    parent.position,
                )
                .await?
            {
                return Ok(Some(sibling));
            }
            parent_id = parent.parent_step_id;
        }
        Ok(None)
    }

    /// Move an execution past its current step.
    ///
    /// Returns the new current step when one exists; otherwise marks the
    /// execution completed, bumps the workflow's completed counter, and
    /// writes a completion entry to the audit trail.
    pub async fn advance(
        &self,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowStep>, EngineError> {
        let current = self
            .store
            .step(execution.tenant_id, execution.current_step_id)
            .await?;
        let next = match &current {
            Some(step) => self.next_step_after(step).await?,
            None => {
                tracing::warn!(
                    execution_id = %execution.id,
                    step_id = %execution.current_step_id,
                    "current step no longer exists; completing execution"
                );
                None
            }
        };

        match next {
            Some(step) => {
                execution.advance_to(step.id);
                self.store.update_execution(execution).await?;
                Ok(Some(step))
            }
            None => {
                execution.complete(now);
                self.store.update_execution(execution).await?;
                self.store
                    .record_completion(execution.tenant_id, execution.workflow_id)
                    .await?;
                self.store
                    .append_log(&ExecutionLog::new(
                        execution,
                        None,
                        LogEvent::Completion,
                        Value::Null,
                        now,
                    ))
                    .await?;
                tracing::info!(execution_id = %execution.id, "execution completed");
                Ok(None)
            }
        }
    }

    /// Pause an execution on a wait step until its delay elapses.
    pub async fn pause_for_wait(
        &self,
        execution: &mut WorkflowExecution,
        wait_step: &WorkflowStep,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let minutes = wait_step.action.wait_minutes().unwrap_or_default();
        let resume_at = now + Duration::minutes(minutes);
        execution.pause(PauseReason::Wait, resume_at);
        self.store.update_execution(execution).await?;
        self.store
            .append_log(&ExecutionLog::new(
                execution,
                Some(wait_step.id),
                LogEvent::Pause,
                json!({"resume_at": resume_at, "minutes": minutes}),
                now,
            ))
            .await?;
        Ok(())
    }

    /// Resume a paused execution whose `resume_at` has elapsed.
    ///
    /// When the workflow's delivery window is closed, the execution stays
    /// paused: `resume_at` moves to the window's next opening and a
    /// reschedule entry records both instants. When the window is open (or
    /// absent), the execution advances past the step it was waiting on and
    /// the caller dispatches the returned step; a `None` return with no
    /// reschedule means the execution completed.
    pub async fn resume_due(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowStep>, EngineError> {
        if !execution.is_due(now) {
            return Ok(None);
        }

        if let Some(window) = &workflow.settings.delivery_window {
            if window.restricts() && !window.is_open(now)? {
                let previous = execution.resume_at;
                let reopens_at = window.next_open(now)?;
                execution.pause(PauseReason::OutsideWindow, reopens_at);
                self.store.update_execution(execution).await?;
                self.store
                    .append_log(&ExecutionLog::new(
                        execution,
                        Some(execution.current_step_id),
                        LogEvent::Reschedule,
                        json!({
                            "previous_resume_at": previous,
                            "rescheduled_to": reopens_at,
                        }),
                        now,
                    ))
                    .await?;
                tracing::info!(
                    execution_id = %execution.id,
                    %reopens_at,
                    "delivery window closed; execution rescheduled"
                );
                return Ok(None);
            }
        }

        let next = self.advance(execution, now).await?;
        if let Some(step) = &next {
            self.store
                .append_log(&ExecutionLog::new(
                    execution,
                    Some(step.id),
                    LogEvent::Resume,
                    Value::Null,
                    now,
                ))
                .await?;
        }
        Ok(next)
    }
}
