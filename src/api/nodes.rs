//! Node registry endpoints
//!
//! Registered credentials are held in memory only and never echoed back.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::require_api_key;
use super::{ApiError, ApiResult, ApiState, api_error};
use crate::Error;
use crate::nodes::{Credentials, SharedNode, SupervisorNode, monitor};

/// Default supervisor gateway port
const DEFAULT_NODE_PORT: u16 = 9001;

/// REST view of one node
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub connected: bool,
    pub process_count: usize,
}

impl From<&SharedNode> for NodeResponse {
    fn from(node: &SharedNode) -> Self {
        Self {
            name: node.name().to_string(),
            host: node.host().to_string(),
            port: node.port(),
            environment: node.environment().map(ToString::to_string),
            connected: node.is_connected(),
            process_count: node.processes().len(),
        }
    }
}

#[derive(Serialize)]
pub struct NodeListResponse {
    pub status: &'static str,
    pub nodes: Vec<NodeResponse>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct NodeCreatedResponse {
    pub status: &'static str,
    pub node: NodeResponse,
}

/// Registration body, e.g. built from a discovery result
///
/// No `Debug`: carries a plain-text password until it is wrapped.
#[derive(Deserialize)]
pub struct RegisterNodeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub environment: Option<String>,
}

async fn list_nodes(State(state): State<Arc<ApiState>>) -> ApiResult<NodeListResponse> {
    let nodes: Vec<NodeResponse> = state.fleet.list().iter().map(NodeResponse::from).collect();
    Ok(Json(NodeListResponse {
        status: "success",
        total: nodes.len(),
        nodes,
    }))
}

async fn register_node(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RegisterNodeRequest>,
) -> Result<(StatusCode, Json<NodeCreatedResponse>), ApiError> {
    let name = body.name.trim().to_string();
    let host = body.host.trim().to_string();
    if name.is_empty() || host.is_empty() {
        return Err(api_error(Error::Validation(
            "name and host are required".to_string(),
        )));
    }
    let port = body.port.unwrap_or(DEFAULT_NODE_PORT);
    if port == 0 {
        return Err(api_error(Error::Validation(
            "port must be between 1 and 65535".to_string(),
        )));
    }

    let credentials = body
        .username
        .filter(|u| !u.is_empty())
        .map(|username| Credentials::new(username, body.password.unwrap_or_default()));
    let environment = body.environment.filter(|e| !e.is_empty());

    let node: SharedNode = Arc::new(
        SupervisorNode::new(name.clone(), host.clone(), port, credentials, environment)
            .map_err(api_error)?,
    );
    state.fleet.register(node.clone()).map_err(api_error)?;

    // first check now rather than on the next monitor tick
    monitor::check_node(&node).await;

    state.activity.record_quietly(
        "node.register",
        &name,
        &format!("registered node {name} at {host}:{port}"),
        Some(&json!({ "host": host, "port": port, "environment": node.environment() })),
    );

    Ok((
        StatusCode::CREATED,
        Json(NodeCreatedResponse {
            status: "success",
            node: NodeResponse::from(&node),
        }),
    ))
}

/// Build node routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_nodes).post(register_node))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
