//! Queue seam: step dispatch out, trigger events in.
//!
//! Queue messages use camelCase field names; that is the shape the external
//! step executor and event producers already speak.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copper_spaniel_core::{ExecutionId, RecordId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enrollment::EventContext;
use crate::error::QueueError;
use crate::execution::WorkflowExecution;

/// What the step executor should do with a dispatched execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCommand {
    /// Execute the execution's current step.
    ExecuteNext,
}

/// A step-queue message handing an execution to the step executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
    /// Execution to act on.
    pub execution_id: ExecutionId,
    /// Workflow the execution belongs to.
    pub workflow_id: WorkflowId,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Command for the executor.
    pub action: StepCommand,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl StepMessage {
    /// Build the dispatch message for an execution's current step.
    #[must_use]
    pub fn for_execution(execution: &WorkflowExecution, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            tenant_id: execution.tenant_id,
            action: StepCommand::ExecuteNext,
            timestamp: now,
        }
    }
}

/// A trigger-queue message describing a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessage {
    /// Event name, e.g. `appointment.completed`.
    pub event_type: String,
    /// Record the event is about.
    pub record_id: RecordId,
    /// Type of that record.
    pub record_type: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Event payload, passed through to the enrollment context.
    #[serde(default)]
    pub event_data: Value,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl TriggerMessage {
    /// Enrollment context carried by this event.
    #[must_use]
    pub fn event_context(&self) -> EventContext {
        EventContext::from_event_data(self.event_data.clone())
    }
}

/// Producer side of the queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Publish a step message for the external step executor.
    async fn publish_step(&self, message: StepMessage) -> Result<(), QueueError>;

    /// Publish a domain event onto the trigger queue.
    async fn publish_trigger(&self, message: TriggerMessage) -> Result<(), QueueError>;
}

/// Builds and publishes step messages through an injected queue client.
pub struct Dispatcher<Q: QueueClient> {
    queue: Q,
}

impl<Q: QueueClient> Dispatcher<Q> {
    /// Create a dispatcher backed by `queue`.
    #[must_use]
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    /// Queue an execution's current step for the step executor.
    pub async fn dispatch_step(
        &self,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.queue
            .publish_step(StepMessage::for_execution(execution, now))
            .await
    }

    /// Publish a domain event onto the trigger queue.
    pub async fn dispatch_trigger_event(
        &self,
        event_type: impl Into<String> + Send,
        record_id: RecordId,
        record_type: impl Into<String> + Send,
        tenant_id: TenantId,
        event_data: Value,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.queue
            .publish_trigger(TriggerMessage {
                event_type: event_type.into(),
                record_id,
                record_type: record_type.into(),
                tenant_id,
                event_data,
                timestamp: now,
            })
            .await
    }
}
