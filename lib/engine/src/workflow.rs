//! Workflow definitions: what enrolls, when, and under which guard rails.

use chrono::{DateTime, Utc};
use copper_spaniel_core::{SegmentId, TenantId, WorkflowId};
use copper_spaniel_schedule::{DeliveryWindow, ScheduleConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Eligible to enroll records.
    Active,
    /// Retained but not enrolling.
    Inactive,
    /// Soft-deleted; never returned by active-only queries.
    Deleted,
}

impl WorkflowStatus {
    /// Whether this workflow may enroll new records.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Active)
    }
}

/// How records enter a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryCondition {
    /// Enroll when a matching domain event arrives on the trigger queue.
    Event {
        /// Event name to match, e.g. `appointment.completed`.
        event_type: String,
    },
    /// Enroll on a recurring cadence evaluated by the batch sweep.
    Schedule {
        /// Cadence definition, including custom cron expressions.
        schedule: ScheduleConfig,
    },
    /// Enroll every record currently matching a stored filter tree.
    Filter {
        /// Raw filter tree as authored; compiled at evaluation time.
        filter: Value,
    },
    /// Enroll only through an explicit operator request.
    Manual,
}

impl EntryCondition {
    /// Event name this workflow listens for, if event-triggered.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        match self {
            EntryCondition::Event { event_type } => Some(event_type),
            _ => None,
        }
    }

    /// Cadence configuration, if schedule-triggered.
    #[must_use]
    pub fn schedule(&self) -> Option<&ScheduleConfig> {
        match self {
            EntryCondition::Schedule { schedule } => Some(schedule),
            _ => None,
        }
    }

    /// Stored filter tree, if filter-triggered.
    #[must_use]
    pub fn filter(&self) -> Option<&Value> {
        match self {
            EntryCondition::Filter { filter } => Some(filter),
            _ => None,
        }
    }

    /// Whether enrollment requires an explicit operator request.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self, EntryCondition::Manual)
    }
}

/// Per-workflow enrollment and delivery policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Whether a record may re-enter after a terminal execution.
    #[serde(default)]
    pub allow_reenrollment: bool,
    /// Minimum days since the previous enrollment before re-entry; zero
    /// disables the delay.
    #[serde(default)]
    pub reenrollment_delay_days: i64,
    /// Optional business-hours policy gating step delivery times.
    #[serde(default)]
    pub delivery_window: Option<DeliveryWindow>,
}

/// A workflow definition scoped to a single tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Tenant that owns this workflow.
    pub tenant_id: TenantId,
    /// Human-readable name.
    pub name: String,
    /// Record type this workflow enrolls, e.g. `pet` or `owner`.
    pub record_type: String,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// How records enter this workflow.
    pub trigger: EntryCondition,
    /// Enrollment and delivery policy.
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Segments whose members are excluded from enrollment, checked in order.
    #[serde(default)]
    pub suppression_segment_ids: Vec<SegmentId>,
    /// Total records ever enrolled.
    pub enrolled_count: i64,
    /// Total executions that reached completion.
    pub completed_count: i64,
    /// Last time the trigger fired or enrolled a record.
    pub last_run_at: Option<DateTime<Utc>>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an active workflow with default settings.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        record_type: impl Into<String>,
        trigger: EntryCondition,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            tenant_id,
            name: name.into(),
            record_type: record_type.into(),
            status: WorkflowStatus::Active,
            trigger,
            settings: WorkflowSettings::default(),
            suppression_segment_ids: Vec::new(),
            enrolled_count: 0,
            completed_count: 0,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the enrollment and delivery policy.
    #[must_use]
    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach suppression segments, checked in the given order.
    #[must_use]
    pub fn with_suppression_segments(mut self, segment_ids: Vec<SegmentId>) -> Self {
        self.suppression_segment_ids = segment_ids;
        self
    }

    /// Whether this workflow may enroll new records.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
