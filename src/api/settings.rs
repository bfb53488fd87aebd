//! Runtime settings endpoints
//!
//! Publishing validates the whole snapshot before it becomes visible;
//! rollback restores the previous snapshot under a new version.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde::Serialize;

use super::auth::require_api_key;
use super::{ApiResult, ApiState, api_error};
use crate::config::{Settings, Versioned};

#[derive(Serialize)]
pub struct SettingsResponse {
    pub status: &'static str,
    pub settings: Versioned<Settings>,
}

async fn get_settings(State(state): State<Arc<ApiState>>) -> ApiResult<SettingsResponse> {
    Ok(Json(SettingsResponse {
        status: "success",
        settings: (*state.settings.current()).clone(),
    }))
}

async fn put_settings(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<Settings>,
) -> ApiResult<SettingsResponse> {
    let settings = state.settings.publish(body).map_err(api_error)?;
    tracing::info!(version = settings.version, "settings published");
    state.activity.record_quietly(
        "settings.publish",
        "settings",
        &format!("published settings version {}", settings.version),
        serde_json::to_value(&settings.value).ok().as_ref(),
    );

    Ok(Json(SettingsResponse {
        status: "success",
        settings: (*settings).clone(),
    }))
}

async fn rollback_settings(State(state): State<Arc<ApiState>>) -> ApiResult<SettingsResponse> {
    let settings = state.settings.rollback().map_err(api_error)?;
    tracing::info!(version = settings.version, "settings rolled back");
    state.activity.record_quietly(
        "settings.rollback",
        "settings",
        &format!("rolled back settings to version {}", settings.version),
        None,
    );

    Ok(Json(SettingsResponse {
        status: "success",
        settings: (*settings).clone(),
    }))
}

/// Build settings routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(get_settings).put(put_settings))
        .route("/rollback", post(rollback_settings))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
