//! Trigger-queue consumer: fans domain events out to listening workflows.
//!
//! Delivery is at-least-once, so each message must be safe to reprocess:
//! a redelivered event finds the execution created by the first attempt and
//! skips it as already enrolled. Messages are acknowledged individually;
//! a message whose processing fails is redelivered without blocking the
//! rest of the batch.

use async_nats::jetstream::{self, AckKind};
use chrono::{DateTime, Utc};
use copper_spaniel_engine::dispatch::{QueueClient, TriggerMessage};
use copper_spaniel_engine::enrollment::EnrollmentOutcome;
use copper_spaniel_engine::error::{EngineError, QueueError};
use copper_spaniel_engine::nats::NatsQueue;
use copper_spaniel_engine::store::RecordStore;
use futures::StreamExt;

use crate::state::AppState;

/// Fan one trigger event out to every active workflow listening for it.
///
/// Returns how many workflows enrolled the record. Guard rejections are
/// logged per workflow and do not fail the message; store failures
/// propagate so the whole message is redelivered.
pub async fn process_trigger_message<S, Q>(
    state: &AppState<S, Q>,
    message: &TriggerMessage,
    now: DateTime<Utc>,
) -> Result<usize, EngineError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    let workflows = state
        .store
        .active_workflows_for_event(message.tenant_id, &message.event_type)
        .await?;
    let context = message.event_context();

    let mut enrolled = 0;
    for workflow in workflows {
        match state
            .engine
            .try_enroll(
                &workflow,
                message.record_id,
                &message.record_type,
                &context,
                now,
            )
            .await?
        {
            EnrollmentOutcome::Enrolled {
                mut execution,
                first_step,
            } => {
                enrolled += 1;
                // Queue delivery is the broker's responsibility; a publish
                // failure here is not worth redelivering the whole event for.
                if let Err(error) = state.settle_step(&mut execution, &first_step, now).await {
                    tracing::warn!(
                        execution_id = %execution.id,
                        %error,
                        "failed to settle first step"
                    );
                }
            }
            EnrollmentOutcome::Skipped { reason } => {
                tracing::debug!(
                    workflow_id = %workflow.id,
                    %reason,
                    "event enrollment skipped"
                );
            }
        }
    }
    Ok(enrolled)
}

/// Consume trigger messages in batches until the connection fails.
///
/// `idle_wait` is how long to sleep when a fetch comes back empty.
pub async fn run_consumer_loop<S>(
    state: &AppState<S, NatsQueue>,
    queue: &NatsQueue,
    batch_size: usize,
    idle_wait: std::time::Duration,
) -> Result<(), EngineError>
where
    S: RecordStore + Clone,
{
    let consumer = queue.trigger_consumer().await?;
    loop {
        let mut batch = consumer
            .fetch()
            .max_messages(batch_size)
            .messages()
            .await
            .map_err(|error| QueueError::ConsumeFailed {
                message: error.to_string(),
            })?;

        let mut received = 0usize;
        let mut malformed = 0usize;
        while let Some(message) = batch.next().await {
            let message = match message {
                Ok(message) => message,
                Err(error) => {
                    tracing::warn!(%error, "failed to receive trigger message");
                    continue;
                }
            };
            received += 1;
            if !handle_message(state, &message).await {
                malformed += 1;
            }
        }

        if malformed > 0 {
            tracing::debug!(count = malformed, "discarded malformed trigger messages");
        }
        if received == 0 {
            tokio::time::sleep(idle_wait).await;
        }
    }
}

/// Returns false when the payload was discarded as malformed.
async fn handle_message<S>(state: &AppState<S, NatsQueue>, message: &jetstream::Message) -> bool
where
    S: RecordStore + Clone,
{
    let trigger: TriggerMessage = match serde_json::from_slice(&message.payload) {
        Ok(trigger) => trigger,
        Err(error) => {
            tracing::warn!(%error, "discarding malformed trigger message");
            // A malformed payload never becomes valid; drop it.
            ack(message).await;
            return false;
        }
    };

    match process_trigger_message(state, &trigger, Utc::now()).await {
        Ok(enrolled) => {
            tracing::debug!(
                event_type = %trigger.event_type,
                record_id = %trigger.record_id,
                enrolled,
                "trigger event processed"
            );
            ack(message).await;
        }
        Err(error) => {
            tracing::warn!(
                event_type = %trigger.event_type,
                record_id = %trigger.record_id,
                %error,
                "trigger processing failed; leaving message for redelivery"
            );
            nack(message).await;
        }
    }
    true
}

async fn ack(message: &jetstream::Message) {
    if let Err(error) = message.ack().await {
        tracing::warn!(%error, "failed to ack trigger message");
    }
}

async fn nack(message: &jetstream::Message) {
    if let Err(error) = message.ack_with(AckKind::Nak(None)).await {
        tracing::warn!(%error, "failed to nack trigger message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use copper_spaniel_core::{RecordId, TenantId};
    use copper_spaniel_engine::memory::{MemoryQueue, MemoryStore};
    use copper_spaniel_engine::step::{StepAction, WorkflowStep};
    use copper_spaniel_engine::workflow::{EntryCondition, Workflow};
    use serde_json::json;

    fn task_action() -> StepAction {
        StepAction::Task {
            kind: "send_email".to_owned(),
            config: serde_json::Value::Null,
        }
    }

    async fn event_workflow(store: &MemoryStore, tenant_id: TenantId, event: &str) -> Workflow {
        let workflow = Workflow::new(
            tenant_id,
            format!("On {event}"),
            "pet",
            EntryCondition::Event {
                event_type: event.to_owned(),
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
        workflow
    }

    fn trigger(tenant_id: TenantId, record_id: RecordId, event: &str) -> TriggerMessage {
        TriggerMessage {
            event_type: event.to_owned(),
            record_id,
            record_type: "pet".to_owned(),
            tenant_id,
            event_data: serde_json::Value::Null,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn event_fans_out_to_listening_workflows() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let tenant_id = TenantId::new();

        event_workflow(&store, tenant_id, "appointment.completed").await;
        event_workflow(&store, tenant_id, "appointment.completed").await;
        let other = event_workflow(&store, tenant_id, "vaccine.due").await;

        let state = AppState::new(store.clone(), queue.clone());
        let record_id = RecordId::new();
        let enrolled = process_trigger_message(
            &state,
            &trigger(tenant_id, record_id, "appointment.completed"),
            now,
        )
        .await
        .unwrap();

        assert_eq!(enrolled, 2);
        assert_eq!(queue.step_messages().await.len(), 2);

        let executions = store.executions().await;
        assert_eq!(executions.len(), 2);
        assert!(executions.iter().all(|e| e.workflow_id != other.id));
    }

    #[tokio::test]
    async fn redelivered_event_does_not_enroll_twice() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let tenant_id = TenantId::new();
        event_workflow(&store, tenant_id, "appointment.completed").await;

        let state = AppState::new(store.clone(), queue.clone());
        let message = trigger(tenant_id, RecordId::new(), "appointment.completed");

        let first = process_trigger_message(&state, &message, now).await.unwrap();
        assert_eq!(first, 1);

        let redelivered = process_trigger_message(&state, &message, now)
            .await
            .unwrap();
        assert_eq!(redelivered, 0);
        assert_eq!(store.executions().await.len(), 1);
    }

    #[tokio::test]
    async fn workflow_ignores_its_own_events() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let tenant_id = TenantId::new();
        let workflow = event_workflow(&store, tenant_id, "reminder.sent").await;

        let state = AppState::new(store.clone(), queue.clone());
        let mut message = trigger(tenant_id, RecordId::new(), "reminder.sent");
        message.event_data = json!({"source_workflow_id": workflow.id.to_string()});

        let enrolled = process_trigger_message(&state, &message, now).await.unwrap();

        assert_eq!(enrolled, 0);
        assert!(store.executions().await.is_empty());
    }

    #[tokio::test]
    async fn wait_first_step_pauses_instead_of_dispatching() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let tenant_id = TenantId::new();

        let workflow = Workflow::new(
            tenant_id,
            "Delayed follow-up",
            "pet",
            EntryCondition::Event {
                event_type: "appointment.completed".to_owned(),
            },
        );
        store
            .insert_step(WorkflowStep::new(
                workflow.id,
                workflow.tenant_id,
                0,
                StepAction::Wait { minutes: 120 },
            ))
            .await;
        store.insert_workflow(workflow.clone()).await;

        let state = AppState::new(store.clone(), queue.clone());
        let enrolled = process_trigger_message(
            &state,
            &trigger(tenant_id, RecordId::new(), "appointment.completed"),
            now,
        )
        .await
        .unwrap();

        assert_eq!(enrolled, 1);
        assert!(queue.step_messages().await.is_empty());

        let executions = store.executions().await;
        assert_eq!(executions.len(), 1);
        assert_eq!(
            executions[0].resume_at,
            Some(now + chrono::Duration::minutes(120))
        );
    }
}
