//! Process group endpoints, optionally scoped to one environment

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::auth::require_api_key;
use super::processes::{BatchResponse, record_batch};
use super::{ApiResult, ApiState, api_error};
use crate::Error;
use crate::fleet::{self, AggregatedGroup, BatchExecutor, Operation};

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentQuery {
    pub environment: Option<String>,
}

impl EnvironmentQuery {
    fn scope(&self) -> Option<&str> {
        self.environment.as_deref().filter(|e| !e.is_empty())
    }
}

#[derive(Serialize)]
pub struct GroupListResponse {
    pub status: &'static str,
    pub groups: Vec<AggregatedGroup>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct GroupResponse {
    pub status: &'static str,
    pub group: AggregatedGroup,
}

async fn list_groups(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EnvironmentQuery>,
) -> ApiResult<GroupListResponse> {
    let nodes = state.fleet.list();
    let groups = fleet::sorted_groups(fleet::aggregate_groups(&nodes, query.scope()).await);

    Ok(Json(GroupListResponse {
        status: "success",
        total: groups.len(),
        groups,
    }))
}

async fn get_group(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> ApiResult<GroupResponse> {
    let nodes = state.fleet.list();
    let group = fleet::aggregate_groups(&nodes, query.scope())
        .await
        .remove(&name)
        .ok_or_else(|| api_error(Error::NotFound(format!("group '{name}'"))))?;

    Ok(Json(GroupResponse {
        status: "success",
        group,
    }))
}

async fn execute_group(
    State(state): State<Arc<ApiState>>,
    Path((name, op)): Path<(String, String)>,
    Query(query): Query<EnvironmentQuery>,
) -> ApiResult<BatchResponse> {
    let op: Operation = op.parse().map_err(api_error)?;
    let executor = BatchExecutor::from_settings(&state.settings.current().value);

    let result = executor
        .execute_group(&state.fleet.list(), &name, query.scope(), op)
        .await;
    if result.is_unknown_target() {
        return Err(api_error(Error::NotFound(format!(
            "group '{name}' has no instances on any node"
        ))));
    }

    record_batch(&state, "group", &result);
    Ok(Json(BatchResponse {
        status: "success",
        result,
    }))
}

/// Build group routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_groups))
        .route("/{name}", get(get_group))
        .route("/{name}/{op}", post(execute_group))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
