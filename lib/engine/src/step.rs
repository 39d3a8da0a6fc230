//! Workflow steps, stored as an id-keyed forest.
//!
//! Each step points at its parent by id and carries an optional branch path
//! plus a position among its siblings. Traversal walks sibling positions and
//! climbs parent ids, so the structure stays a flat table with no cycles.

use chrono::{DateTime, Utc};
use copper_spaniel_core::{StepId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a step does when an execution reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Pause the execution and resume after the given delay.
    Wait {
        /// Delay before the execution may continue.
        minutes: i64,
    },
    /// Container for conditional branches; children carry branch paths.
    Branch,
    /// An externally executed action such as sending a reminder.
    Task {
        /// Action kind understood by the step executor, e.g. `send_email`.
        kind: String,
        /// Kind-specific configuration, passed through untouched.
        #[serde(default)]
        config: Value,
    },
}

impl StepAction {
    /// Wait duration in minutes, if this is a wait step.
    #[must_use]
    pub fn wait_minutes(&self) -> Option<i64> {
        match self {
            StepAction::Wait { minutes } => Some(*minutes),
            _ => None,
        }
    }

    /// Whether this step pauses the execution.
    #[must_use]
    pub fn is_wait(&self) -> bool {
        matches!(self, StepAction::Wait { .. })
    }
}

/// A single step within a workflow's step forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier for this step.
    pub id: StepId,
    /// Workflow this step belongs to.
    pub workflow_id: WorkflowId,
    /// Tenant that owns the workflow.
    pub tenant_id: TenantId,
    /// Parent step id; `None` for root-level steps.
    pub parent_step_id: Option<StepId>,
    /// Branch label under the parent, e.g. `yes` or `no`; `None` outside
    /// branch containers.
    pub branch_path: Option<String>,
    /// Ordering among siblings sharing the same parent and branch path.
    pub position: i32,
    /// What happens when an execution reaches this step.
    pub action: StepAction,
    /// When this step was created.
    pub created_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Create a root-level step.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        tenant_id: TenantId,
        position: i32,
        action: StepAction,
    ) -> Self {
        Self {
            id: StepId::new(),
            workflow_id,
            tenant_id,
            parent_step_id: None,
            branch_path: None,
            position,
            action,
            created_at: Utc::now(),
        }
    }

    /// Nest this step under a parent, optionally on a named branch path.
    #[must_use]
    pub fn under(mut self, parent_step_id: StepId, branch_path: Option<&str>) -> Self {
        self.parent_step_id = Some(parent_step_id);
        self.branch_path = branch_path.map(str::to_owned);
        self
    }
}
