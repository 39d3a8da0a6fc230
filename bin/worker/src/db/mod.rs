//! Postgres-backed record store.
//!
//! The schema is owned by the wider platform; this store attaches to the
//! existing tables and keeps every read and write tenant-scoped.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copper_spaniel_core::{ExecutionId, RecordId, SegmentId, StepId, TenantId, WorkflowId};
use copper_spaniel_engine::error::StoreError;
use copper_spaniel_engine::execution::{ExecutionLog, WorkflowExecution};
use copper_spaniel_engine::segment::Segment;
use copper_spaniel_engine::step::WorkflowStep;
use copper_spaniel_engine::store::{Record, RecordRef, RecordStore};
use copper_spaniel_engine::workflow::Workflow;
use copper_spaniel_filter::{BindValue, Predicate};
use sqlx::PgPool;

use rows::{
    execution_status_str, log_event_str, pause_reason_str, ExecutionRow, RecordRefRow, RecordRow,
    SegmentRow, StepRow, WorkflowRow,
};

const WORKFLOW_COLUMNS: &str = "id, tenant_id, name, record_type, status, trigger, settings, \
     suppression_segment_ids, enrolled_count, completed_count, last_run_at, created_at, updated_at";

const STEP_COLUMNS: &str =
    "id, workflow_id, tenant_id, parent_step_id, branch_path, position, action, created_at";

const EXECUTION_COLUMNS: &str = "id, tenant_id, workflow_id, record_id, record_type, status, \
     current_step_id, resume_at, pause_reason, enrolled_at, completed_at";

fn store_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Decode(source) => StoreError::DecodeFailed {
            message: source.to_string(),
        },
        sqlx::Error::ColumnDecode { index, source } => StoreError::DecodeFailed {
            message: format!("column {index}: {source}"),
        },
        sqlx::Error::Io(source) => StoreError::ConnectionFailed {
            message: source.to_string(),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::ConnectionFailed {
            message: error.to_string(),
        },
        other => StoreError::QueryFailed {
            message: other.to_string(),
        },
    }
}

/// Record store backed by the platform's Postgres database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn workflow(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE tenant_id = $1 AND id = $2 AND status != 'deleted'"
        ))
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(WorkflowRow::try_into_workflow)
            .transpose()
            .map_err(store_error)
    }

    async fn active_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE tenant_id = $1 AND status = 'active' \
               AND trigger->>'type' = 'event' AND trigger->>'event_type' = $2"
        ))
        .bind(tenant_id.to_string())
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_workflow().map_err(store_error))
            .collect()
    }

    async fn schedule_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE status = 'active' AND trigger->>'type' = 'schedule'"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_workflow().map_err(store_error))
            .collect()
    }

    async fn filter_triggered_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE status = 'active' AND trigger->>'type' = 'filter'"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_workflow().map_err(store_error))
            .collect()
    }

    async fn set_workflow_last_run(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflows SET last_run_at = $3, updated_at = $3 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn record_enrollment(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflows \
             SET enrolled_count = enrolled_count + 1, last_run_at = $3, updated_at = $3 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn record_completion(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflows SET completed_count = completed_count + 1 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn step(
        &self,
        tenant_id: TenantId,
        step_id: StepId,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let row: Option<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.to_string())
        .bind(step_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(StepRow::try_into_step)
            .transpose()
            .map_err(store_error)
    }

    async fn first_root_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let row: Option<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps \
             WHERE tenant_id = $1 AND workflow_id = $2 AND parent_step_id IS NULL \
             ORDER BY position ASC LIMIT 1"
        ))
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(StepRow::try_into_step)
            .transpose()
            .map_err(store_error)
    }

    async fn next_sibling_step(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        parent_step_id: Option<StepId>,
        branch_path: Option<&str>,
        after_position: i32,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        let row: Option<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps \
             WHERE tenant_id = $1 AND workflow_id = $2 \
               AND parent_step_id IS NOT DISTINCT FROM $3 \
               AND branch_path IS NOT DISTINCT FROM $4 \
               AND position > $5 \
             ORDER BY position ASC LIMIT 1"
        ))
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(parent_step_id.map(|id| id.to_string()))
        .bind(branch_path)
        .bind(after_position)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(StepRow::try_into_step)
            .transpose()
            .map_err(store_error)
    }

    async fn latest_execution(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        record_id: RecordId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
             WHERE tenant_id = $1 AND workflow_id = $2 AND record_id = $3 \
             ORDER BY enrolled_at DESC LIMIT 1"
        ))
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(record_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(ExecutionRow::try_into_execution)
            .transpose()
            .map_err(store_error)
    }

    async fn execution(
        &self,
        tenant_id: TenantId,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
             WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.to_string())
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(ExecutionRow::try_into_execution)
            .transpose()
            .map_err(store_error)
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO workflow_executions \
                 (id, tenant_id, workflow_id, record_id, record_type, status, \
                  current_step_id, resume_at, pause_reason, enrolled_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.record_id.to_string())
        .bind(&execution.record_type)
        .bind(execution_status_str(execution.status))
        .bind(execution.current_step_id.to_string())
        .bind(execution.resume_at)
        .bind(execution.pause_reason.map(pause_reason_str))
        .bind(execution.enrolled_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_executions \
             SET status = $3, current_step_id = $4, resume_at = $5, pause_reason = $6, \
                 completed_at = $7 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(execution.tenant_id.to_string())
        .bind(execution.id.to_string())
        .bind(execution_status_str(execution.status))
        .bind(execution.current_step_id.to_string())
        .bind(execution.resume_at)
        .bind(execution.pause_reason.map(pause_reason_str))
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn executions_due_for_resume(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
             WHERE status = 'paused' AND resume_at <= $1 \
             ORDER BY resume_at ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_execution().map_err(store_error))
            .collect()
    }

    async fn append_log(&self, entry: &ExecutionLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO execution_logs \
                 (id, tenant_id, execution_id, step_id, event, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.to_string())
        .bind(entry.tenant_id.to_string())
        .bind(entry.execution_id.to_string())
        .bind(entry.step_id.map(|id| id.to_string()))
        .bind(log_event_str(entry.event))
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn segment(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
    ) -> Result<Option<Segment>, StoreError> {
        let row: Option<SegmentRow> = sqlx::query_as(
            "SELECT id, tenant_id, name, record_type, rule, created_at \
             FROM segments WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.to_string())
        .bind(segment_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(SegmentRow::try_into_segment)
            .transpose()
            .map_err(store_error)
    }

    async fn is_segment_member(
        &self,
        tenant_id: TenantId,
        segment_id: SegmentId,
        record_id: RecordId,
    ) -> Result<bool, StoreError> {
        let (member,): (bool,) = sqlx::query_as(
            "SELECT EXISTS( \
                 SELECT 1 FROM segment_members sm \
                 JOIN segments s ON s.id = sm.segment_id \
                 WHERE s.tenant_id = $1 AND sm.segment_id = $2 AND sm.record_id = $3)",
        )
        .bind(tenant_id.to_string())
        .bind(segment_id.to_string())
        .bind(record_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(member)
    }

    async fn record(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        record_id: RecordId,
    ) -> Result<Option<Record>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, tenant_id, record_type, attributes, created_at, updated_at \
             FROM records WHERE tenant_id = $1 AND record_type = $2 AND id = $3",
        )
        .bind(tenant_id.to_string())
        .bind(record_type)
        .bind(record_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(RecordRow::try_into_record)
            .transpose()
            .map_err(store_error)
    }

    async fn record_refs_of_type(
        &self,
        tenant_id: TenantId,
        record_type: &str,
    ) -> Result<Vec<RecordRef>, StoreError> {
        let rows: Vec<RecordRefRow> = sqlx::query_as(
            "SELECT id, record_type FROM records WHERE tenant_id = $1 AND record_type = $2",
        )
        .bind(tenant_id.to_string())
        .bind(record_type)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_ref().map_err(store_error))
            .collect()
    }

    async fn records_matching(
        &self,
        tenant_id: TenantId,
        record_type: &str,
        predicate: &Predicate,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecordRef>, StoreError> {
        // Predicate parameters start after the two scope binds.
        let rendered = predicate.to_where_clause(now, 3);
        let sql = format!(
            "SELECT id, record_type FROM records \
             WHERE tenant_id = $1 AND record_type = $2 AND ({})",
            rendered.clause
        );

        let mut query = sqlx::query_as::<_, RecordRefRow>(&sql)
            .bind(tenant_id.to_string())
            .bind(record_type);
        for bind in rendered.binds {
            query = match bind {
                BindValue::Text(text) => query.bind(text),
                BindValue::Number(number) => query.bind(number),
                BindValue::Timestamp(at) => query.bind(at),
            };
        }

        let rows: Vec<RecordRefRow> = query.fetch_all(&self.pool).await.map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.try_into_ref().map_err(store_error))
            .collect()
    }
}
