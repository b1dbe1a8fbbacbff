use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::ApiState;
use crate::metrics;
use crate::session::{
    EnvironmentHealth, Session, SessionError, SessionStatus, SessionSummary, TaskReport,
};

/// Error body returned by every failing handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::NotReady { .. } => StatusCode::CONFLICT,
            SessionError::InvalidTask(_) => StatusCode::BAD_REQUEST,
            SessionError::ProvisioningFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::EnvironmentUnhealthy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Agent(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "Request failed");
        }
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "code": self.code })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions_active: usize,
    pub tools: usize,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions_active: state.sessions.active_count().await,
        tools: state.agent.catalog().len(),
    })
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}

#[derive(Serialize)]
pub struct ToolListing {
    pub name: String,
    pub source: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

pub async fn list_tools(State(state): State<ApiState>) -> impl IntoResponse {
    let catalog = state.agent.catalog();
    let tools: Vec<ToolListing> = catalog
        .entries()
        .map(|entry| ToolListing {
            name: entry.descriptor.name.clone(),
            source: entry.target.label().to_string(),
            description: entry.descriptor.description.clone(),
            input_schema: entry.descriptor.input_schema.clone(),
        })
        .collect();

    Json(json!({
        "tools": tools,
        "collisions": catalog.collisions(),
        "unavailable_providers": catalog.unavailable_providers(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub environment_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The body is optional; an absent or empty body creates an unnamed session
pub async fn create_session(
    State(state): State<ApiState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let session = state.sessions.create_session(request.name).await?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        status: session.status,
        environment_endpoint: session.environment_endpoint,
        created_at: session.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
}

pub async fn list_sessions(
    State(state): State<ApiState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let filter = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    Ok(Json(state.sessions.list_sessions(filter).await))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.get_session(&id).await?))
}

pub async fn delete_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let session = state.sessions.delete_session(&id).await?;
    Ok(Json(session.summary()))
}

#[derive(Debug, Deserialize)]
pub struct RunTaskRequest {
    pub task: String,
}

pub async fn run_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<RunTaskRequest>, JsonRejection>,
) -> Result<Json<TaskReport>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.sessions.run_task(&id, &request.task).await?))
}

pub async fn cancel_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.cancel_task(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": id, "cancelling": true })),
    ))
}

pub async fn reset_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let session = state.sessions.reset_history(&id).await?;
    Ok(Json(session.summary()))
}

pub async fn environment_health(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<EnvironmentHealth>, ApiError> {
    Ok(Json(state.sessions.environment_health(&id).await?))
}
