//! HTTP surface: health probe and manual enrollment.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use copper_spaniel_core::{RecordId, TenantId, WorkflowId};
use copper_spaniel_engine::dispatch::QueueClient;
use copper_spaniel_engine::enrollment::{EnrollmentOutcome, EventContext, SkipReason};
use copper_spaniel_engine::store::RecordStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

/// Request body for a manual enrollment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    workflow_id: WorkflowId,
    record_id: RecordId,
    tenant_id: TenantId,
}

/// Errors returned by the enrollment endpoint.
#[derive(Debug)]
pub enum ApiError {
    WorkflowNotFound,
    WorkflowInactive,
    NotManuallyTriggered,
    Skipped(SkipReason),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::WorkflowNotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "workflow_not_found"}),
            ),
            Self::WorkflowInactive => (
                StatusCode::CONFLICT,
                json!({"error": "workflow_inactive"}),
            ),
            Self::NotManuallyTriggered => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": "not_manually_triggered"}),
            ),
            Self::Skipped(reason) => {
                let mut body = match serde_json::to_value(&reason) {
                    Ok(Value::Object(map)) => map,
                    _ => serde_json::Map::new(),
                };
                body.insert("enrolled".to_owned(), Value::Bool(false));
                (StatusCode::CONFLICT, Value::Object(body))
            }
            Self::Internal(message) => {
                tracing::error!("Enrollment request failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal_error"}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Builds the worker's router.
pub fn router<S, Q>(state: Arc<AppState<S, Q>>) -> Router
where
    S: RecordStore + Clone + 'static,
    Q: QueueClient + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/enrollments", post(enroll::<S, Q>))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn enroll<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<Value>, ApiError>
where
    S: RecordStore + Clone + 'static,
    Q: QueueClient + 'static,
{
    enroll_record(&state, &request, Utc::now()).await.map(Json)
}

/// Enroll a record into a manually triggered workflow.
async fn enroll_record<S, Q>(
    state: &AppState<S, Q>,
    request: &EnrollRequest,
    now: DateTime<Utc>,
) -> Result<Value, ApiError>
where
    S: RecordStore + Clone,
    Q: QueueClient,
{
    let workflow = state
        .store
        .workflow(request.tenant_id, request.workflow_id)
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?
        .ok_or(ApiError::WorkflowNotFound)?;

    if !workflow.is_active() {
        return Err(ApiError::WorkflowInactive);
    }
    if !workflow.trigger.is_manual() {
        return Err(ApiError::NotManuallyTriggered);
    }

    let outcome = state
        .engine
        .try_enroll(
            &workflow,
            request.record_id,
            &workflow.record_type,
            &EventContext::empty(),
            now,
        )
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?;

    match outcome {
        EnrollmentOutcome::Enrolled {
            mut execution,
            first_step,
        } => {
            if let Err(error) = state.settle_step(&mut execution, &first_step, now).await {
                tracing::warn!(
                    execution_id = %execution.id,
                    %error,
                    "failed to settle first step"
                );
            }
            Ok(json!({"enrolled": true, "executionId": execution.id}))
        }
        EnrollmentOutcome::Skipped { reason } => Err(ApiError::Skipped(reason)),
    }
}
