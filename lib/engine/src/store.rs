//! Persistence seam for workflows, steps, executions, segments, and records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copper_spaniel_core::{ExecutionId, RecordId, SegmentId, StepId, TenantId, WorkflowId};
use copper_spaniel_filter::Predicate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::execution::{ExecutionLog, WorkflowExecution};
use crate::segment::Segment;
use crate::step::WorkflowStep;
use crate::workflow::Workflow;

/// A tenant's business record, e.g. a pet or an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier for this record.
    pub id: RecordId,
    /// Tenant that owns this record.
    pub tenant_id: TenantId,
    /// Record type, e.g. `pet` or `owner`.
    pub record_type: String,
    /// Flat attribute object evaluated by filters and segments.
    pub attributes: Value,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
    /// When this record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a record with the given attributes.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        record_type: impl Into<String>,
        attributes: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            tenant_id,
            record_type: record_type.into(),
            attributes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A record id plus its type, as returned by bulk record queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record identifier.
    pub id: RecordId,
    /// Record type.
    pub record_type: String,
}

/// Storage backend for the engine.
///
/// All reads and writes are scoped by tenant except the platform-wide sweep
/// queries used by the batch loop, which return rows across tenants with the
/// tenant id on each row.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a workflow by id, excluding soft-deleted workflows.
    async fn workflow(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Fetch active event-triggered workflows listening for `event_type`.
    async fn active_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Fetch active schedule-triggered workflows across all tenants.
    async fn schedule_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Fetch active filter-triggered workflows across all tenants.
    async fn filter_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Set a workflow's last run time.
    async fn set_workflow_last_run(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Count one enrollment: bump the enrolled counter and set the last run
    /// time.
    async fn record_enrollment(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Count one completion: bump the completed counter.
    async fn record_completion(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<(), StoreError>;

    /// Fetch a step by id.
    async fn step(
        &self,
        tenant_id: TenantId,
        step_id: StepId,
    ) -> Result<Option<WorkflowStep>, StoreError>;

    /// Fetch a workflow's root-level step with the lowest position.
    async fn first_root_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowStep>, StoreError>;

    /// Fetch the lowest-position step after `after_position` among siblings
    /// sharing `parent_step_id` and `branch_path`.
    async fn next_sibling_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        parent_step_id: Option<StepId>,
        branch_path: Option<&str>,
        after_position: i32,
    ) -> Result<Option<WorkflowStep>, StoreError>;

    /// Fetch the most recent execution of a workflow for a record.
    async fn latest_execution(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        record_id: RecordId,
    ) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Fetch an execution by id.
    async fn execution(
        &self,
        tenant_id: TenantId,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Insert a new execution.
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Persist an execution's current state.
    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Fetch paused executions with `resume_at` at or before `now`, across
    /// all tenants.
    async fn executions_due_for_resume(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Append an audit-trail entry.
    async fn append_log(&self, entry: &ExecutionLog) -> Result<(), StoreError>;

    /// Fetch a segment by id.
    async fn segment(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
    ) -> Result<Option<Segment>, StoreError>;

    /// Whether a record is on a static segment's membership list.
    async fn is_segment_member(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
        record_id: RecordId,
    ) -> Result<bool, StoreError>;

    /// Fetch a record by type and id.
    async fn record(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        record_id: RecordId,
    ) -> Result<Option<Record>, StoreError>;

    /// Fetch all records of a type for a tenant.
    async fn record_refs_of_type(
        &self,
        tenant_id: TenantId,
        record_type: &str,
    ) -> Result<Vec<RecordRef>, StoreError>;

    /// Fetch records of a type matching a compiled predicate.
    async fn records_matching(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        predicate: &Predicate,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecordRef>, StoreError>;
}
