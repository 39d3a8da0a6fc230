//! In-memory store and queue backends.
//!
//! Used by the test suites and handy for local development; the semantics
//! mirror the Postgres and NATS backends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copper_spaniel_core::{ExecutionId, RecordId, SegmentId, StepId, TenantId, WorkflowId};
use copper_spaniel_filter::Predicate;
use tokio::sync::Mutex;

use crate::dispatch::{QueueClient, StepMessage, TriggerMessage};
use crate::error::{QueueError, StoreError};
use crate::execution::{ExecutionLog, WorkflowExecution};
use crate::segment::Segment;
use crate::step::WorkflowStep;
use crate::store::{Record, RecordRef, RecordStore};
use crate::workflow::{EntryCondition, Workflow, WorkflowStatus};

#[derive(Debug, Default)]
struct MemoryState {
    workflows: HashMap<WorkflowId, Workflow>,
    steps: HashMap<StepId, WorkflowStep>,
    executions: HashMap<ExecutionId, WorkflowExecution>,
    logs: Vec<ExecutionLog>,
    segments: HashMap<SegmentId, Segment>,
    segment_members: HashMap<SegmentId, HashSet<RecordId>>,
    records: HashMap<RecordId, Record>,
}

/// In-memory record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workflow.
    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.state
            .lock()
            .await
            .workflows
            .insert(workflow.id, workflow);
    }

    /// Seed a step.
    pub async fn insert_step(&self, step: WorkflowStep) {
        self.state.lock().await.steps.insert(step.id, step);
    }

    /// Seed a segment.
    pub async fn insert_segment(&self, segment: Segment) {
        self.state.lock().await.segments.insert(segment.id, segment);
    }

    /// Add a record to a static segment's membership list.
    pub async fn add_segment_member(&self, segment_id: SegmentId, record_id: RecordId) {
        self.state
            .lock()
            .await
            .segment_members
            .entry(segment_id)
            .or_default()
            .insert(record_id);
    }

    /// Seed a record.
    pub async fn insert_record(&self, record: Record) {
        self.state.lock().await.records.insert(record.id, record);
    }

    /// Snapshot of all executions, for assertions.
    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.state.lock().await.executions.values().cloned().collect()
    }

    /// Snapshot of the audit trail in append order, for assertions.
    pub async fn logs(&self) -> Vec<ExecutionLog> {
        self.state.lock().await.logs.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn workflow(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .get(&workflow_id)
            .filter(|workflow| {
                workflow.tenant_id == tenant_id && workflow.status != WorkflowStatus::Deleted
            })
            .cloned())
    }

    async fn active_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .values()
            .filter(|workflow| {
                workflow.tenant_id == tenant_id
                    && workflow.is_active()
                    && workflow.trigger.event_type() == Some(event_type)
            })
            .cloned()
            .collect())
    }

    async fn schedule_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .values()
            .filter(|workflow| {
                workflow.is_active()
                    && matches!(workflow.trigger, EntryCondition::Schedule { .. })
            })
            .cloned()
            .collect())
    }

    async fn filter_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .values()
            .filter(|workflow| {
                workflow.is_active() && matches!(workflow.trigger, EntryCondition::Filter { .. })
            })
            .cloned()
            .collect())
    }

    async fn set_workflow_last_run(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(workflow) = state
            .workflows
            .get_mut(&workflow_id)
            .filter(|workflow| workflow.tenant_id == tenant_id)
        {
            workflow.last_run_at = Some(at);
            workflow.updated_at = at;
        }
        Ok(())
    }

    async fn record_enrollment(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(workflow) = state
            .workflows
            .get_mut(&workflow_id)
            .filter(|workflow| workflow.tenant_id == tenant_id)
        {
            workflow.enrolled_count += 1;
            workflow.last_run_at = Some(at);
            workflow.updated_at = at;
        }
        Ok(())
    }

    async fn record_completion(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(workflow) = state
            .workflows
            .get_mut(&workflow_id)
            .filter(|workflow| workflow.tenant_id == tenant_id)
        {
            workflow.completed_count += 1;
        }
        Ok(())
    }

    async fn step(
        &self,
        tenant_id: TenantId,
        step_id: StepId,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .steps
            .get(&step_id)
            .filter(|step| step.tenant_id == tenant_id)
            .cloned())
    }

    async fn first_root_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .steps
            .values()
            .filter(|step| {
                step.tenant_id == tenant_id
                    && step.workflow_id == workflow_id
                    && step.parent_step_id.is_none()
            })
            .min_by_key(|step| step.position)
            .cloned())
    }

    async fn next_sibling_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        parent_step_id: Option<StepId>,
        branch_path: Option<&str>,
        after_position: i32,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .steps
            .values()
            .filter(|step| {
                step.tenant_id == tenant_id
                    && step.workflow_id == workflow_id
                    && step.parent_step_id == parent_step_id
                    && step.branch_path.as_deref() == branch_path
                    && step.position > after_position
            })
            .min_by_key(|step| step.position)
            .cloned())
    }

    async fn latest_execution(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        record_id: RecordId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|execution| {
                execution.tenant_id == tenant_id
                    && execution.workflow_id == workflow_id
                    && execution.record_id == record_id
            })
            .max_by_key(|execution| execution.enrolled_at)
            .cloned())
    }

    async fn execution(
        &self,
        tenant_id: TenantId,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .get(&execution_id)
            .filter(|execution| execution.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn executions_due_for_resume(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|execution| execution.is_due(now))
            .cloned()
            .collect())
    }

    async fn append_log(&self, entry: &ExecutionLog) -> Result<(), StoreError> {
        self.state.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn segment(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
    ) -> Result<Option<Segment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .segments
            .get(&segment_id)
            .filter(|segment| segment.tenant_id == tenant_id)
            .cloned())
    }

    async fn is_segment_member(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
        record_id: RecordId,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        let applies = state
            .segments
            .get(&segment_id)
            .is_some_and(|segment| segment.tenant_id == tenant_id);
        Ok(applies
            && state
                .segment_members
                .get(&segment_id)
                .is_some_and(|members| members.contains(&record_id)))
    }

    async fn record(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        record_id: RecordId,
    ) -> Result<Option<Record>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&record_id)
            .filter(|record| record.tenant_id == tenant_id && record.record_type == record_type)
            .cloned())
    }

    async fn record_refs_of_type(
        &self,
        tenant_id: TenantId,
        record_type: &str,
    ) -> Result<Vec<RecordRef>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|record| record.tenant_id == tenant_id && record.record_type == record_type)
            .map(|record| RecordRef {
                id: record.id,
                record_type: record.record_type.clone(),
            })
            .collect())
    }

    async fn records_matching(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        predicate: &Predicate,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecordRef>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|record| {
                record.tenant_id == tenant_id
                    && record.record_type == record_type
                    && predicate.matches(&record.attributes, now)
            })
            .map(|record| RecordRef {
                id: record.id,
                record_type: record.record_type.clone(),
            })
            .collect())
    }
}

/// In-memory queue client capturing published messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    steps: Arc<Mutex<Vec<StepMessage>>>,
    triggers: Arc<Mutex<Vec<TriggerMessage>>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of published step messages in publish order.
    pub async fn step_messages(&self) -> Vec<StepMessage> {
        self.steps.lock().await.clone()
    }

    /// Snapshot of published trigger messages in publish order.
    pub async fn trigger_messages(&self) -> Vec<TriggerMessage> {
        self.triggers.lock().await.clone()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn publish_step(&self, message: StepMessage) -> Result<(), QueueError> {
        self.steps.lock().await.push(message);
        Ok(())
    }

    async fn publish_trigger(&self, message: TriggerMessage) -> Result<(), QueueError> {
        self.triggers.lock().await.push(message);
        Ok(())
    }
}
