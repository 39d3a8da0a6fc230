//! Enrollment: the guarded path from a trigger firing to a running execution.

use chrono::{DateTime, Duration, Utc};
use copper_spaniel_core::{RecordId, SegmentId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::execution::{ExecutionLog, LogEvent, WorkflowExecution};
use crate::segment::SuppressionChecker;
use crate::step::WorkflowStep;
use crate::store::RecordStore;
use crate::workflow::Workflow;

/// Provenance of the trigger that requested an enrollment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    /// Workflow whose own step produced the triggering event, if any.
    pub source_workflow_id: Option<WorkflowId>,
    /// Raw event payload, kept for audit detail.
    pub data: Value,
}

impl EventContext {
    /// Context for a trigger with no originating workflow.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context derived from a trigger event's payload.
    ///
    /// Reads `source_workflow_id` out of the payload when a workflow step
    /// emitted the event, enabling the self-trigger loop guard.
    #[must_use]
    pub fn from_event_data(data: Value) -> Self {
        let source_workflow_id = data
            .get("source_workflow_id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok());
        Self {
            source_workflow_id,
            data,
        }
    }
}

/// Why an enrollment was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The triggering event came from this workflow's own steps.
    SelfTriggeredLoop,
    /// The record is in a suppression segment.
    Suppressed {
        /// Segment that matched.
        segment_id: SegmentId,
    },
    /// The record already has an active execution of this workflow.
    AlreadyEnrolled,
    /// A previous execution finished and the workflow forbids re-entry.
    ReenrollmentNotAllowed,
    /// Re-entry is allowed but the configured delay has not elapsed.
    ReenrollmentDelay,
    /// The workflow has no steps to run.
    NoSteps,
}

impl SkipReason {
    /// Stable snake_case label for logs and responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::SelfTriggeredLoop => "self_triggered_loop",
            SkipReason::Suppressed { .. } => "suppressed",
            SkipReason::AlreadyEnrolled => "already_enrolled",
            SkipReason::ReenrollmentNotAllowed => "reenrollment_not_allowed",
            SkipReason::ReenrollmentDelay => "reenrollment_delay",
            SkipReason::NoSteps => "no_steps",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an enrollment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentOutcome {
    /// The record enrolled; its first step is ready to dispatch.
    Enrolled {
        /// The newly persisted execution, positioned at the first step.
        execution: WorkflowExecution,
        /// The step the execution starts at.
        first_step: WorkflowStep,
    },
    /// The record was not enrolled, with the reason why.
    Skipped {
        /// Which guard rejected the enrollment.
        reason: SkipReason,
    },
}

impl EnrollmentOutcome {
    /// Whether the record enrolled.
    #[must_use]
    pub fn is_enrolled(&self) -> bool {
        matches!(self, EnrollmentOutcome::Enrolled { .. })
    }
}

/// Runs the enrollment pipeline against a record store.
pub struct EnrollmentEngine<S: RecordStore> {
    store: S,
}

impl<S: RecordStore> EnrollmentEngine<S> {
    /// Create an engine backed by `store`.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Attempt to enroll a record into a workflow.
    ///
    /// Guards run in a fixed order and the first one to reject wins: the
    /// self-trigger loop guard, suppression segments, the active-execution
    /// check, the re-enrollment policy, and finally the requirement that the
    /// workflow has at least one step. On success the execution is persisted
    /// at the first step, the workflow's counters are bumped, and an
    /// enrollment entry lands in the audit trail. The caller dispatches the
    /// returned first step.
    pub async fn try_enroll(
        &self,
        workflow: &Workflow,
        record_id: RecordId,
        record_type: &str,
        context: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentOutcome, EngineError> {
        if context.source_workflow_id == Some(workflow.id) {
            return Ok(skipped(SkipReason::SelfTriggeredLoop));
        }

        if !workflow.suppression_segment_ids.is_empty() {
            let attributes = self.record_attributes(workflow, record_id, record_type).await;
            let checker = SuppressionChecker::new(&self.store);
            if let Some(segment_id) = checker
                .suppressing_segment(workflow, record_id, record_type, &attributes, now)
                .await
            {
                return Ok(skipped(SkipReason::Suppressed { segment_id }));
            }
        }

        if let Some(previous) = self
            .store
            .latest_execution(workflow.tenant_id, workflow.id, record_id)
            .await?
        {
            if previous.status.is_active() {
                return Ok(skipped(SkipReason::AlreadyEnrolled));
            }
            if !workflow.settings.allow_reenrollment {
                return Ok(skipped(SkipReason::ReenrollmentNotAllowed));
            }
            let delay_days = workflow.settings.reenrollment_delay_days;
            if delay_days > 0 && now - previous.enrolled_at < Duration::days(delay_days) {
                return Ok(skipped(SkipReason::ReenrollmentDelay));
            }
        }

        let Some(first_step) = self
            .store
            .first_root_step(workflow.tenant_id, workflow.id)
            .await?
        else {
            return Ok(skipped(SkipReason::NoSteps));
        };

        let execution = WorkflowExecution::new(
            workflow.tenant_id,
            workflow.id,
            record_id,
            record_type,
            first_step.id,
            now,
        );
        self.store.insert_execution(&execution).await?;
        self.store
            .record_enrollment(workflow.tenant_id, workflow.id, now)
            .await?;
        self.store
            .append_log(&ExecutionLog::new(
                &execution,
                Some(first_step.id),
                LogEvent::Enrollment,
                serde_json::json!({
                    "record_id": record_id,
                    "record_type": record_type,
                }),
                now,
            ))
            .await?;

        tracing::info!(
            workflow_id = %workflow.id,
            %record_id,
            execution_id = %execution.id,
            "record enrolled"
        );

        Ok(EnrollmentOutcome::Enrolled {
            execution,
            first_step,
        })
    }

    /// Load the record's attributes for suppression evaluation.
    ///
    /// A missing or unreadable record does not block enrollment; dynamic
    /// segments then evaluate against an empty attribute set.
    async fn record_attributes(
        &self,
        workflow: &Workflow,
        record_id: RecordId,
        record_type: &str,
    ) -> Value {
        match self
            .store
            .record(workflow.tenant_id, record_type, record_id)
            .await
        {
            Ok(Some(record)) => record.attributes,
            Ok(None) => Value::Null,
            Err(error) => {
                tracing::warn!(
                    %record_id,
                    %error,
                    "failed to load record for suppression check"
                );
                Value::Null
            }
        }
    }
}

fn skipped(reason: SkipReason) -> EnrollmentOutcome {
    tracing::debug!(reason = %reason, "enrollment skipped");
    EnrollmentOutcome::Skipped { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::memory::MemoryStore;
    use crate::segment::{Segment, SegmentRule};
    use crate::step::{StepAction, WorkflowStep};
    use crate::workflow::{EntryCondition, WorkflowSettings};
    use chrono::TimeZone;
    use copper_spaniel_core::TenantId;
    use serde_json::json;

    fn task_action() -> StepAction {
        StepAction::Task {
            kind: "send_email".to_owned(),
            config: Value::Null,
        }
    }

    async fn seeded_workflow(store: &MemoryStore, settings: WorkflowSettings) -> Workflow {
        let workflow = Workflow::new(
            TenantId::new(),
            "Post-visit follow-up",
            "pet",
            EntryCondition::Event {
                event_type: "appointment.completed".to_owned(),
            },
        )
        .with_settings(settings);
        store
            .insert_step(WorkflowStep::new(
                workflow.id,
                workflow.tenant_id,
                0,
                task_action(),
            ))
            .await;
        store.insert_workflow(workflow.clone()).await;
        workflow
    }

    #[tokio::test]
    async fn enrolls_and_counts_once() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(&store, WorkflowSettings::default()).await;
        let engine = EnrollmentEngine::new(store.clone());
        let record_id = RecordId::new();

        let outcome = engine
            .try_enroll(&workflow, record_id, "pet", &EventContext::empty(), now)
            .await
            .unwrap();

        let EnrollmentOutcome::Enrolled { execution, .. } = outcome else {
            panic!("expected enrollment, got {outcome:?}");
        };
        let persisted = store
            .execution(workflow.tenant_id, execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Running);
        assert_eq!(persisted.record_id, record_id);

        let stored = store
            .workflow(workflow.tenant_id, workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.enrolled_count, 1);
        assert_eq!(stored.last_run_at, Some(now));

        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event, LogEvent::Enrollment);
    }

    #[tokio::test]
    async fn second_attempt_skips_as_already_enrolled() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(&store, WorkflowSettings::default()).await;
        let engine = EnrollmentEngine::new(store.clone());
        let record_id = RecordId::new();

        let first = engine
            .try_enroll(&workflow, record_id, "pet", &EventContext::empty(), now)
            .await
            .unwrap();
        assert!(first.is_enrolled());

        let second = engine
            .try_enroll(
                &workflow,
                record_id,
                "pet",
                &EventContext::empty(),
                now + Duration::minutes(5),
            )
            .await
            .unwrap();
        assert_eq!(
            second,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::AlreadyEnrolled
            }
        );

        let stored = store
            .workflow(workflow.tenant_id, workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.enrolled_count, 1);
    }

    #[tokio::test]
    async fn self_triggered_event_is_rejected_first() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(&store, WorkflowSettings::default()).await;
        let engine = EnrollmentEngine::new(store.clone());

        let context = EventContext::from_event_data(json!({
            "source_workflow_id": workflow.id.to_string(),
        }));
        let outcome = engine
            .try_enroll(&workflow, RecordId::new(), "pet", &context, now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::SelfTriggeredLoop
            }
        );
        assert!(store.executions().await.is_empty());
    }

    #[tokio::test]
    async fn other_workflows_event_still_enrolls() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(&store, WorkflowSettings::default()).await;
        let engine = EnrollmentEngine::new(store.clone());

        let context = EventContext::from_event_data(json!({
            "source_workflow_id": WorkflowId::new().to_string(),
        }));
        let outcome = engine
            .try_enroll(&workflow, RecordId::new(), "pet", &context, now)
            .await
            .unwrap();

        assert!(outcome.is_enrolled());
    }

    #[tokio::test]
    async fn suppressed_record_reports_matching_segment() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let mut workflow = seeded_workflow(&store, WorkflowSettings::default()).await;

        let segment = Segment::new(
            workflow.tenant_id,
            "Do not contact",
            SegmentRule::Dynamic {
                filter: json!({
                    "conditions": [{"field": "do_not_contact", "operator": "is_true"}]
                }),
            },
        );
        let segment_id = segment.id;
        store.insert_segment(segment).await;
        workflow.suppression_segment_ids = vec![segment_id];

        let record = crate::store::Record::new(
            workflow.tenant_id,
            "pet",
            json!({"do_not_contact": true}),
        );
        let record_id = record.id;
        store.insert_record(record).await;

        let engine = EnrollmentEngine::new(store.clone());
        let outcome = engine
            .try_enroll(&workflow, record_id, "pet", &EventContext::empty(), now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::Suppressed { segment_id }
            }
        );
    }

    #[tokio::test]
    async fn reenrollment_follows_policy_and_delay() {
        let enrolled_at = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(
            &store,
            WorkflowSettings {
                allow_reenrollment: true,
                reenrollment_delay_days: 30,
                delivery_window: None,
            },
        )
        .await;
        let engine = EnrollmentEngine::new(store.clone());
        let record_id = RecordId::new();

        let first = engine
            .try_enroll(&workflow, record_id, "pet", &EventContext::empty(), enrolled_at)
            .await
            .unwrap();
        let EnrollmentOutcome::Enrolled { mut execution, .. } = first else {
            panic!("expected enrollment");
        };
        execution.complete(enrolled_at + Duration::hours(1));
        store.update_execution(&execution).await.unwrap();

        let too_soon = engine
            .try_enroll(
                &workflow,
                record_id,
                "pet",
                &EventContext::empty(),
                enrolled_at + Duration::days(10),
            )
            .await
            .unwrap();
        assert_eq!(
            too_soon,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::ReenrollmentDelay
            }
        );

        let after_delay = engine
            .try_enroll(
                &workflow,
                record_id,
                "pet",
                &EventContext::empty(),
                enrolled_at + Duration::days(31),
            )
            .await
            .unwrap();
        assert!(after_delay.is_enrolled());
    }

    #[tokio::test]
    async fn completed_execution_without_reenrollment_blocks() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = seeded_workflow(&store, WorkflowSettings::default()).await;
        let engine = EnrollmentEngine::new(store.clone());
        let record_id = RecordId::new();

        let first = engine
            .try_enroll(&workflow, record_id, "pet", &EventContext::empty(), now)
            .await
            .unwrap();
        let EnrollmentOutcome::Enrolled { mut execution, .. } = first else {
            panic!("expected enrollment");
        };
        execution.complete(now + Duration::hours(1));
        store.update_execution(&execution).await.unwrap();

        let retry = engine
            .try_enroll(
                &workflow,
                record_id,
                "pet",
                &EventContext::empty(),
                now + Duration::days(90),
            )
            .await
            .unwrap();
        assert_eq!(
            retry,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::ReenrollmentNotAllowed
            }
        );
    }

    #[tokio::test]
    async fn workflow_without_steps_skips() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let workflow = Workflow::new(
            TenantId::new(),
            "Empty",
            "pet",
            EntryCondition::Manual,
        );
        store.insert_workflow(workflow.clone()).await;
        let engine = EnrollmentEngine::new(store.clone());

        let outcome = engine
            .try_enroll(&workflow, RecordId::new(), "pet", &EventContext::empty(), now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EnrollmentOutcome::Skipped {
                reason: SkipReason::NoSteps
            }
        );
        assert!(store.executions().await.is_empty());
    }

    #[test]
    fn skip_reason_serializes_with_reason_tag() {
        let segment_id = SegmentId::new();
        let value = serde_json::to_value(SkipReason::Suppressed { segment_id }).unwrap();

        assert_eq!(value["reason"], "suppressed");
        assert_eq!(value["segment_id"], segment_id.to_string());
        assert_eq!(
            serde_json::to_value(SkipReason::AlreadyEnrolled).unwrap()["reason"],
            "already_enrolled"
        );
    }
}
