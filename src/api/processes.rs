//! Cross-fleet process endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;

use super::auth::require_api_key;
use super::{ApiResult, ApiState, api_error};
use crate::Error;
use crate::fleet::{self, AggregatedProcess, BatchExecutor, BatchOperationResult, Operation};

#[derive(Serialize)]
pub struct AggregatedResponse {
    pub status: &'static str,
    pub processes: Vec<AggregatedProcess>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub result: BatchOperationResult,
}

/// Every process on every reachable node, grouped by name
async fn aggregated(State(state): State<Arc<ApiState>>) -> ApiResult<AggregatedResponse> {
    let nodes = state.fleet.list();
    let processes = fleet::sorted_processes(fleet::aggregate(&nodes).await);

    Ok(Json(AggregatedResponse {
        status: "success",
        total: processes.len(),
        processes,
    }))
}

/// Run start, stop or restart on every instance of a process
///
/// Per-node failures and unreachable nodes are part of the result; 404 only
/// when every node answered and none hosts the process.
async fn execute(
    State(state): State<Arc<ApiState>>,
    Path((name, op)): Path<(String, String)>,
) -> ApiResult<BatchResponse> {
    let op: Operation = op.parse().map_err(api_error)?;
    let executor = BatchExecutor::from_settings(&state.settings.current().value);

    let result = executor.execute(&state.fleet.list(), &name, op).await;
    if result.is_unknown_target() {
        return Err(api_error(Error::NotFound(format!(
            "process '{name}' is not present on any node"
        ))));
    }

    record_batch(&state, "process", &result);
    Ok(Json(BatchResponse {
        status: "success",
        result,
    }))
}

/// Log a batch outcome to the activity log
pub(super) fn record_batch(state: &ApiState, kind: &str, result: &BatchOperationResult) {
    let failed_nodes: Vec<&str> = result
        .results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.node_name.as_str())
        .collect();

    state.activity.record_quietly(
        &format!("{kind}.{}", result.operation),
        &result.process_name,
        &result.summary(),
        Some(&json!({
            "total_instances": result.total_instances,
            "success_count": result.success_count,
            "failure_count": result.failure_count,
            "failed_nodes": failed_nodes,
            "skipped_nodes": result.skipped_nodes,
        })),
    );
}

/// Build process routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/aggregated", get(aggregated))
        .route("/{name}/{op}", post(execute))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
