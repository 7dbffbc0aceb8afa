//! Axum server and routes.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use display_dispatch::Dispatcher;
use display_types::{
    BaseResponse, DispatchError, EnqueueRequest, ErrorKind, JobId, JobRecord, JobRef,
    QueueStatus, TransitionRequest, WorkerOutcome,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub dispatcher: Dispatcher,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/enqueue", post(handle_enqueue))
        .route("/queue/status", get(handle_queue_status))
        .route("/job/:id", get(handle_job_status).delete(handle_cancel))
        .route("/job/:id/transition", post(handle_transition))
        .route("/job/:id/complete", post(handle_complete))
        .route("/failures", get(handle_failures))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidPayload => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::StateConflict | ErrorKind::InvalidTransition => {
            StatusCode::CONFLICT
        }
        ErrorKind::DispatchFailure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Dispatcher error rendered as a `BaseResponse` envelope with a matching status.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let body = BaseResponse {
            code: i32::from(status.as_u16()),
            message: self.0.to_string(),
            data: Some(serde_json::json!({ "kind": kind, "job_id": self.0.job_id() })),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<BaseResponse<T>>, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(DispatchError::InvalidPayload(e.to_string())))
}

fn parse_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError(DispatchError::InvalidPayload(format!("invalid job id {raw:?}: {e}"))))
}

async fn handle_enqueue(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<JobRef> {
    let req: EnqueueRequest = parse_body(&body)?;
    let job = state.dispatcher.enqueue(req).await?;
    Ok(Json(BaseResponse::ok(job)))
}

async fn handle_queue_status(State(state): State<Arc<AppState>>) -> ApiResult<QueueStatus> {
    let status = state.dispatcher.status().queue_status().await?;
    Ok(Json(BaseResponse::ok(status)))
}

async fn handle_job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<JobRecord> {
    let job = state.dispatcher.job_status(parse_id(&id)?).await?;
    Ok(Json(BaseResponse::ok(job)))
}

async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<JobRef> {
    let job = state.dispatcher.cancel(parse_id(&id)?).await?;
    Ok(Json(BaseResponse::ok(job)))
}

async fn handle_transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<JobRecord> {
    let id = parse_id(&id)?;
    let req: TransitionRequest = parse_body(&body)?;
    let job = state.dispatcher.update_state(id, req).await?;
    Ok(Json(BaseResponse::ok(job)))
}

async fn handle_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<JobRecord> {
    let id = parse_id(&id)?;
    let outcome: WorkerOutcome = parse_body(&body)?;
    let job = state.dispatcher.complete(id, outcome).await?;
    Ok(Json(BaseResponse::ok(job)))
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn handle_failures(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FailuresQuery>,
) -> ApiResult<Vec<JobRecord>> {
    let failed = state.dispatcher.status().failures(q.since, q.limit).await?;
    Ok(Json(BaseResponse::ok(failed)))
}

async fn handle_health() -> &'static str {
    "ok"
}
