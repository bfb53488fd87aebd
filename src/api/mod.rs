//! HTTP API server for the fleet console

mod auth;
pub mod discovery;
pub mod groups;
pub mod health;
pub mod nodes;
pub mod processes;
pub mod settings;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use secrecy::SecretString;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{ConfigStore, Settings};
use crate::db::{ActivityRepo, DbPool};
use crate::discovery::DiscoveryEngine;
use crate::nodes::SharedFleet;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub api_key: Option<SecretString>,
    pub fleet: SharedFleet,
    pub settings: Arc<ConfigStore<Settings>>,
    pub discovery: Arc<DiscoveryEngine>,
    pub activity: ActivityRepo,
}

impl ApiState {
    #[must_use]
    pub fn new(
        db: DbPool,
        api_key: Option<SecretString>,
        fleet: SharedFleet,
        settings: Arc<ConfigStore<Settings>>,
        discovery: Arc<DiscoveryEngine>,
    ) -> Self {
        Self {
            activity: ActivityRepo::new(db.clone()),
            db,
            api_key,
            fleet,
            settings,
            discovery,
        }
    }
}

/// Uniform error body: `{"status":"error","error":{"code","message"}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Handler result carrying a JSON body
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build an error body
#[must_use]
pub fn error_response(code: &str, message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        status: "error",
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// Map a crate error onto an HTTP status and error body
#[must_use]
pub fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    let message = match &e {
        Error::Validation(m) | Error::NotFound(m) | Error::Conflict(m) => m.clone(),
        other => other.to_string(),
    };
    (status, error_response(e.code(), &message))
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/processes", processes::router(state.clone()))
        .nest("/api/groups", groups::router(state.clone()))
        .nest("/api/discovery", discovery::router(state.clone()))
        .nest("/api/nodes", nodes::router(state.clone()))
        .nest("/api/settings", settings::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!("FLEET_API_KEY not set - API is unauthenticated");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
