//! Periodic sweep: resumes due executions and fires time-based triggers.
//!
//! One tick walks three candidate lists in order: paused executions whose
//! `resume_at` has elapsed, schedule-triggered workflows, and
//! filter-triggered workflows. A failure scoped to one execution, workflow,
//! or record is logged and recorded on the summary without stopping the
//! pass; only the candidate queries themselves propagate an error.

use chrono::{DateTime, Utc};
use copper_spaniel_engine::dispatch::QueueClient;
use copper_spaniel_engine::enrollment::{EnrollmentOutcome, EventContext};
use copper_spaniel_engine::error::EngineError;
use copper_spaniel_engine::execution::ExecutionStatus;
use copper_spaniel_engine::store::{RecordRef, RecordStore};
use copper_spaniel_engine::workflow::Workflow;
use copper_spaniel_filter::compile;

use crate::state::AppState;

/// Counters and per-item failures from one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Paused executions that advanced past their wait.
    pub resumed: usize,
    /// Due executions pushed back because a delivery window was closed.
    pub rescheduled: usize,
    /// Records newly enrolled by schedule and filter triggers.
    pub enrolled: usize,
    /// Enrollment attempts a guard rejected.
    pub skipped: usize,
    /// Descriptions of the items that failed and were stepped over.
    pub errors: Vec<String>,
}

impl TickSummary {
    /// Whether the pass changed nothing and hit no errors.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs one sweep pass at `now`.
pub async fn run_tick<S, Q>(
    state: &AppState<S, Q>,
    now: DateTime<Utc>,
) -> Result<TickSummary, EngineError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    let mut summary = TickSummary::default();
    resume_due_executions(state, now, &mut summary).await?;
    fire_schedule_triggers(state, now, &mut summary).await?;
    fire_filter_triggers(state, now, &mut summary).await?;
    Ok(summary)
}

async fn resume_due_executions<S, Q>(
    state: &AppState<S, Q>,
    now: DateTime<Utc>,
    summary: &mut TickSummary,
) -> Result<(), EngineError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    for mut execution in state.store.executions_due_for_resume(now).await? {
        let workflow = match state
            .store
            .workflow(execution.tenant_id, execution.workflow_id)
            .await
        {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                tracing::warn!(
                    execution_id = %execution.id,
                    workflow_id = %execution.workflow_id,
                    "due execution references a missing workflow"
                );
                summary
                    .errors
                    .push(format!("execution {}: workflow missing", execution.id));
                continue;
            }
            Err(error) => {
                tracing::warn!(
                    execution_id = %execution.id,
                    %error,
                    "failed to load workflow for due execution"
                );
                summary
                    .errors
                    .push(format!("execution {}: {error}", execution.id));
                continue;
            }
        };

        match state.lifecycle.resume_due(&mut execution, &workflow, now).await {
            Ok(Some(step)) => {
                summary.resumed += 1;
                if let Err(error) = state.settle_step(&mut execution, &step, now).await {
                    tracing::warn!(
                        execution_id = %execution.id,
                        %error,
                        "failed to settle resumed execution"
                    );
                    summary
                        .errors
                        .push(format!("execution {}: {error}", execution.id));
                }
            }
            Ok(None) if execution.status == ExecutionStatus::Paused => {
                summary.rescheduled += 1;
            }
            Ok(None) => {
                // Resumed straight into completion.
                summary.resumed += 1;
            }
            Err(error) => {
                tracing::warn!(execution_id = %execution.id, %error, "failed to resume execution");
                summary
                    .errors
                    .push(format!("execution {}: {error}", execution.id));
            }
        }
    }
    Ok(())
}

async fn fire_schedule_triggers<S, Q>(
    state: &AppState<S, Q>,
    now: DateTime<Utc>,
    summary: &mut TickSummary,
) -> Result<(), EngineError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    for workflow in state.store.schedule_triggered_workflows().await? {
        let Some(schedule) = workflow.trigger.schedule() else {
            tracing::warn!(workflow_id = %workflow.id, "schedule trigger without cadence config");
            summary
                .errors
                .push(format!("workflow {}: no cadence config", workflow.id));
            continue;
        };

        match schedule.should_fire(workflow.last_run_at, now) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                tracing::warn!(workflow_id = %workflow.id, %error, "unusable schedule config");
                summary
                    .errors
                    .push(format!("workflow {}: {error}", workflow.id));
                continue;
            }
        }

        // Claim the run before enrolling so an overlapping sweep sees the
        // workflow as already fired today.
        if let Err(error) = state
            .store
            .set_workflow_last_run(workflow.tenant_id, workflow.id, now)
            .await
        {
            tracing::warn!(workflow_id = %workflow.id, %error, "failed to claim scheduled run");
            summary
                .errors
                .push(format!("workflow {}: {error}", workflow.id));
            continue;
        }

        let refs = match state
            .store
            .record_refs_of_type(workflow.tenant_id, &workflow.record_type)
            .await
        {
            Ok(refs) => refs,
            Err(error) => {
                tracing::warn!(workflow_id = %workflow.id, %error, "failed to list records");
                summary
                    .errors
                    .push(format!("workflow {}: {error}", workflow.id));
                continue;
            }
        };

        tracing::debug!(
            workflow_id = %workflow.id,
            candidates = refs.len(),
            "scheduled trigger fired"
        );
        enroll_refs(state, &workflow, refs, now, summary).await;
    }
    Ok(())
}

async fn fire_filter_triggers<S, Q>(
    state: &AppState<S, Q>,
    now: DateTime<Utc>,
    summary: &mut TickSummary,
) -> Result<(), EngineError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    for workflow in state.store.filter_triggered_workflows().await? {
        let Some(filter) = workflow.trigger.filter() else {
            tracing::warn!(workflow_id = %workflow.id, "filter trigger without a filter");
            summary
                .errors
                .push(format!("workflow {}: no filter", workflow.id));
            continue;
        };

        let predicate = match compile(filter) {
            Ok(predicate) => predicate,
            Err(error) => {
                tracing::warn!(workflow_id = %workflow.id, %error, "unusable trigger filter");
                summary
                    .errors
                    .push(format!("workflow {}: {error}", workflow.id));
                continue;
            }
        };

        let refs = match state
            .store
            .records_matching(workflow.tenant_id, &workflow.record_type, &predicate, now)
            .await
        {
            Ok(refs) => refs,
            Err(error) => {
                tracing::warn!(workflow_id = %workflow.id, %error, "failed to scan records");
                summary
                    .errors
                    .push(format!("workflow {}: {error}", workflow.id));
                continue;
            }
        };

        enroll_refs(state, &workflow, refs, now, summary).await;
    }
    Ok(())
}

async fn enroll_refs<S, Q>(
    state: &AppState<S, Q>,
    workflow: &Workflow,
    refs: Vec<RecordRef>,
    now: DateTime<Utc>,
    summary: &mut TickSummary,
) where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    let context = EventContext::empty();
    for record in refs {
        match state
            .engine
            .try_enroll(workflow, record.id, &record.record_type, &context, now)
            .await
        {
            Ok(EnrollmentOutcome::Enrolled {
                mut execution,
                first_step,
            }) => {
                summary.enrolled += 1;
                if let Err(error) = state.settle_step(&mut execution, &first_step, now).await {
                    tracing::warn!(
                        execution_id = %execution.id,
                        %error,
                        "failed to settle first step"
                    );
                    summary
                        .errors
                        .push(format!("execution {}: {error}", execution.id));
                }
            }
            Ok(EnrollmentOutcome::Skipped { .. }) => summary.skipped += 1,
            Err(error) => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    record_id = %record.id,
                    %error,
                    "enrollment failed"
                );
                summary
                    .errors
                    .push(format!("record {}: {error}", record.id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use copper_spaniel_core::{RecordId, TenantId};
    use copper_spaniel_engine::execution::{PauseReason, WorkflowExecution};
    use copper_spaniel_engine::memory::{MemoryQueue, MemoryStore};
    use copper_spaniel_engine::step::{StepAction, WorkflowStep};
    use copper_spaniel_engine::store::Record;
    use copper_spaniel_engine::workflow::{EntryCondition, WorkflowSettings};
    use copper_spaniel_schedule::{DeliveryWindow, ScheduleConfig, ScheduleKind};
    use serde_json::json;

    fn task_action() -> StepAction {
        StepAction::Task {
            kind: "send_email".to_owned(),
            config: serde_json::Value::Null,
        }
    }

    fn weekly_monday_at(time: &str) -> EntryCondition {
        EntryCondition::Schedule {
            schedule: ScheduleConfig {
                kind: ScheduleKind::Weekly,
                time: Some(time.to_owned()),
                days: vec![1],
                dates: Vec::new(),
                cron: None,
            },
        }
    }

    #[tokio::test]
    async fn weekly_batch_enrolls_every_record_of_type() {
        // Monday 2024-06-10 08:01, one minute after the configured time.
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 1, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let workflow = Workflow::new(
            TenantId::new(),
            "Weekly wellness reminder",
            "pet",
            weekly_monday_at("08:00"),
        );
        store
            .insert_step(WorkflowStep::new(
                workflow.id,
                workflow.tenant_id,
                0,
                task_action(),
            ))
            .await;
        store.insert_workflow(workflow.clone()).await;
        for name in ["Biscuit", "Mochi"] {
            store
                .insert_record(Record::new(
                    workflow.tenant_id,
                    "pet",
                    json!({"name": name}),
                ))
                .await;
        }

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, now).await.unwrap();

        assert_eq!(summary.enrolled, 2);
        assert!(summary.errors.is_empty());
        assert_eq!(queue.step_messages().await.len(), 2);

        let stored = store
            .workflow(workflow.tenant_id, workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_run_at, Some(now));

        // The day is claimed; a later tick the same day fires nothing.
        let again = run_tick(&state, now + Duration::minutes(5)).await.unwrap();
        assert_eq!(again.enrolled, 0);
        assert_eq!(again.skipped, 0);
    }

    #[tokio::test]
    async fn due_wait_resumes_and_dispatches_next_step() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let workflow = Workflow::new(
            TenantId::new(),
            "Post-op check-ins",
            "pet",
            EntryCondition::Manual,
        );
        store.insert_workflow(workflow.clone()).await;
        let wait = WorkflowStep::new(
            workflow.id,
            workflow.tenant_id,
            0,
            StepAction::Wait { minutes: 30 },
        );
        let follow_up =
            WorkflowStep::new(workflow.id, workflow.tenant_id, 1, task_action());
        store.insert_step(wait.clone()).await;
        store.insert_step(follow_up.clone()).await;

        let mut execution = WorkflowExecution::new(
            workflow.tenant_id,
            workflow.id,
            RecordId::new(),
            "pet",
            wait.id,
            now - Duration::hours(1),
        );
        execution.pause(PauseReason::Wait, now - Duration::minutes(5));
        store.insert_execution(&execution).await.unwrap();

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, now).await.unwrap();

        assert_eq!(summary.resumed, 1);
        assert_eq!(summary.rescheduled, 0);
        let messages = queue.step_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].execution_id, execution.id);

        let updated = store
            .execution(workflow.tenant_id, execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Running);
        assert_eq!(updated.current_step_id, follow_up.id);
    }

    #[tokio::test]
    async fn closed_window_reschedules_without_dispatching() {
        // Saturday 2024-06-15 16:00 UTC against a Mon-Fri window.
        let saturday = Utc.with_ymd_and_hms(2024, 6, 15, 16, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let window: DeliveryWindow = serde_json::from_value(json!({
            "enabled": true,
            "days": ["monday", "tuesday", "wednesday", "thursday", "friday"],
            "start": "09:00",
            "end": "17:00",
            "timezone": "America/New_York",
        }))
        .unwrap();
        let workflow = Workflow::new(
            TenantId::new(),
            "Business-hours series",
            "pet",
            EntryCondition::Manual,
        )
        .with_settings(WorkflowSettings {
            allow_reenrollment: false,
            reenrollment_delay_days: 0,
            delivery_window: Some(window),
        });
        store.insert_workflow(workflow.clone()).await;
        let wait = WorkflowStep::new(
            workflow.id,
            workflow.tenant_id,
            0,
            StepAction::Wait { minutes: 10 },
        );
        store.insert_step(wait.clone()).await;

        let mut execution = WorkflowExecution::new(
            workflow.tenant_id,
            workflow.id,
            RecordId::new(),
            "pet",
            wait.id,
            saturday - Duration::hours(2),
        );
        execution.pause(PauseReason::Wait, saturday - Duration::minutes(5));
        store.insert_execution(&execution).await.unwrap();

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, saturday).await.unwrap();

        assert_eq!(summary.rescheduled, 1);
        assert_eq!(summary.resumed, 0);
        assert!(queue.step_messages().await.is_empty());

        let updated = store
            .execution(workflow.tenant_id, execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Paused);
        assert_eq!(updated.pause_reason, Some(PauseReason::OutsideWindow));
        let monday_open = Utc.with_ymd_and_hms(2024, 6, 17, 13, 0, 0).unwrap();
        assert_eq!(updated.resume_at, Some(monday_open));
    }

    #[tokio::test]
    async fn resume_onto_second_wait_pauses_again() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let workflow = Workflow::new(
            TenantId::new(),
            "Two-stage wait",
            "pet",
            EntryCondition::Manual,
        );
        store.insert_workflow(workflow.clone()).await;
        let first_wait = WorkflowStep::new(
            workflow.id,
            workflow.tenant_id,
            0,
            StepAction::Wait { minutes: 30 },
        );
        let second_wait = WorkflowStep::new(
            workflow.id,
            workflow.tenant_id,
            1,
            StepAction::Wait { minutes: 60 },
        );
        store.insert_step(first_wait.clone()).await;
        store.insert_step(second_wait.clone()).await;

        let mut execution = WorkflowExecution::new(
            workflow.tenant_id,
            workflow.id,
            RecordId::new(),
            "pet",
            first_wait.id,
            now - Duration::hours(1),
        );
        execution.pause(PauseReason::Wait, now - Duration::minutes(1));
        store.insert_execution(&execution).await.unwrap();

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, now).await.unwrap();

        assert_eq!(summary.resumed, 1);
        assert!(queue.step_messages().await.is_empty());

        let updated = store
            .execution(workflow.tenant_id, execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Paused);
        assert_eq!(updated.current_step_id, second_wait.id);
        assert_eq!(updated.resume_at, Some(now + Duration::minutes(60)));
    }

    #[tokio::test]
    async fn bad_schedule_config_does_not_abort_the_pass() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 1, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let broken = Workflow::new(
            TenantId::new(),
            "Broken cadence",
            "pet",
            weekly_monday_at("25:00"),
        );
        store
            .insert_step(WorkflowStep::new(broken.id, broken.tenant_id, 0, task_action()))
            .await;
        store.insert_workflow(broken.clone()).await;

        let healthy = Workflow::new(
            TenantId::new(),
            "Healthy cadence",
            "pet",
            weekly_monday_at("08:00"),
        );
        store
            .insert_step(WorkflowStep::new(
                healthy.id,
                healthy.tenant_id,
                0,
                task_action(),
            ))
            .await;
        store.insert_workflow(healthy.clone()).await;
        store
            .insert_record(Record::new(healthy.tenant_id, "pet", json!({})))
            .await;

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, now).await.unwrap();

        assert_eq!(summary.enrolled, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains(&broken.id.to_string()));
    }

    #[tokio::test]
    async fn filter_trigger_enrolls_only_matching_records() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let workflow = Workflow::new(
            TenantId::new(),
            "Senior dog outreach",
            "pet",
            EntryCondition::Filter {
                filter: json!({
                    "conditions": [
                        {"field": "species", "operator": "eq", "value": "dog"},
                    ],
                }),
            },
        );
        store
            .insert_step(WorkflowStep::new(
                workflow.id,
                workflow.tenant_id,
                0,
                task_action(),
            ))
            .await;
        store.insert_workflow(workflow.clone()).await;

        let dog = Record::new(workflow.tenant_id, "pet", json!({"species": "dog"}));
        let cat = Record::new(workflow.tenant_id, "pet", json!({"species": "cat"}));
        let dog_id = dog.id;
        store.insert_record(dog).await;
        store.insert_record(cat).await;

        let state = AppState::new(store.clone(), queue.clone());
        let summary = run_tick(&state, now).await.unwrap();

        assert_eq!(summary.enrolled, 1);
        let executions = store.executions().await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].record_id, dog_id);

        // The standing filter re-scans next tick; the running execution
        // makes the same record skip instead of enrolling twice.
        let next_day = now + Duration::days(1);
        let again = run_tick(&state, next_day).await.unwrap();
        assert_eq!(again.enrolled, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(store.executions().await.len(), 1);
    }
}
