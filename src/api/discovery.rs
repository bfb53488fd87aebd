//! Discovery task endpoints
//!
//! The submitted password is moved into a `SecretString` on arrival and is
//! never part of any response body.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::auth::require_api_key;
use super::{ApiError, ApiResult, ApiState, api_error};
use crate::discovery::{
    CidrSummary, DiscoveryRequest, DiscoveryResult, DiscoveryTask, TaskPage, TaskProgress,
    TaskStatus,
};
use crate::nodes::Credentials;

/// Creator recorded on tasks submitted over the API
const API_CREATOR: &str = "api";

/// Scan submission body
///
/// No `Debug`: the password is plain text until it is wrapped.
#[derive(Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub timeout_seconds: Option<u64>,
    pub max_workers: Option<usize>,
}

impl From<CreateTaskRequest> for DiscoveryRequest {
    fn from(body: CreateTaskRequest) -> Self {
        Self {
            cidr: body.cidr,
            port: body.port,
            credentials: Credentials::new(body.username, body.password),
            timeout_seconds: body.timeout_seconds,
            max_workers: body.max_workers,
            created_by: API_CREATOR.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCidrRequest {
    #[serde(default)]
    pub cidr: String,
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub status: &'static str,
    pub task: DiscoveryTask,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub page: TaskPage,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub status: &'static str,
    pub progress: TaskProgress,
}

#[derive(Serialize)]
pub struct ResultsResponse {
    pub status: &'static str,
    pub results: Vec<DiscoveryResult>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct CidrResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub summary: CidrSummary,
}

async fn create_task(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let task = state.discovery.start(body.into()).map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            status: "success",
            task,
        }),
    ))
}

async fn list_tasks(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<TaskListResponse> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(api_error)?;

    let page = state
        .discovery
        .list(query.page, query.limit, status)
        .map_err(api_error)?;
    Ok(Json(TaskListResponse {
        status: "success",
        page,
    }))
}

async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<TaskResponse> {
    let task = state.discovery.get(&id).map_err(api_error)?;
    Ok(Json(TaskResponse {
        status: "success",
        task,
    }))
}

async fn delete_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<MessageResponse> {
    state.discovery.delete(&id).map_err(api_error)?;
    Ok(Json(MessageResponse {
        status: "success",
        message: format!("task {id} deleted"),
    }))
}

async fn task_progress(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<ProgressResponse> {
    let progress = state.discovery.progress(&id).map_err(api_error)?;
    Ok(Json(ProgressResponse {
        status: "success",
        progress,
    }))
}

async fn task_results(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<ResultsResponse> {
    let results = state.discovery.results(&id).map_err(api_error)?;
    Ok(Json(ResultsResponse {
        status: "success",
        total: results.len(),
        results,
    }))
}

async fn cancel_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<TaskResponse> {
    let task = state.discovery.cancel(&id).map_err(api_error)?;
    Ok(Json(TaskResponse {
        status: "success",
        task,
    }))
}

async fn validate_cidr(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ValidateCidrRequest>,
) -> ApiResult<CidrResponse> {
    let summary = state.discovery.validate_cidr(&body.cidr).map_err(api_error)?;
    Ok(Json(CidrResponse {
        status: "success",
        summary,
    }))
}

/// Build discovery routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/progress", get(task_progress))
        .route("/tasks/{id}/results", get(task_results))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/validate-cidr", post(validate_cidr))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
