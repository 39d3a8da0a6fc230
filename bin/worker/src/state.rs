//! Shared state for the worker's HTTP handlers and background loops.

use chrono::{DateTime, Utc};
use copper_spaniel_engine::dispatch::{Dispatcher, QueueClient};
use copper_spaniel_engine::enrollment::EnrollmentEngine;
use copper_spaniel_engine::error::EngineError;
use copper_spaniel_engine::execution::WorkflowExecution;
use copper_spaniel_engine::lifecycle::ExecutionLifecycle;
use copper_spaniel_engine::step::WorkflowStep;
use copper_spaniel_engine::store::RecordStore;

/// Shared application state.
pub struct AppState<S: RecordStore, Q: QueueClient> {
    /// Record store backing every read and write.
    pub store: S,
    /// Enrollment pipeline.
    pub engine: EnrollmentEngine<S>,
    /// Execution state machine.
    pub lifecycle: ExecutionLifecycle<S>,
    /// Step queue producer.
    pub dispatcher: Dispatcher<Q>,
}

impl<S, Q> AppState<S, Q>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    /// Creates a new application state.
    pub fn new(store: S, queue: Q) -> Self {
        Self {
            engine: EnrollmentEngine::new(store.clone()),
            lifecycle: ExecutionLifecycle::new(store.clone()),
            dispatcher: Dispatcher::new(queue),
            store,
        }
    }

    /// Settle a running execution at its current step.
    ///
    /// Wait steps pause the execution in place; anything else is queued for
    /// the step executor.
    pub async fn settle_step(
        &self,
        execution: &mut WorkflowExecution,
        step: &WorkflowStep,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if step.action.is_wait() {
            self.lifecycle.pause_for_wait(execution, step, now).await?;
        } else {
            self.dispatcher.dispatch_step(execution, now).await?;
        }
        Ok(())
    }
}
