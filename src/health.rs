//! `GET /health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload containing the build
//! version, uptime, active providers and a summary of the currently
//! published configuration snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build: String,
    pub uptime_seconds: u64,
    pub providers: Vec<String>,
    pub config: ConfigHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigHealth {
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub reloads: u64,
    pub frontends: usize,
    pub backends: usize,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.current();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: format!(
            "{} ({})",
            env!("SIGNPOST_GIT_SHORT"),
            env!("SIGNPOST_BUILD_PROFILE")
        ),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        providers: state.providers.iter().map(ToString::to_string).collect(),
        config: ConfigHealth {
            version: snapshot
                .version
                .get(..8)
                .unwrap_or(&snapshot.version)
                .to_string(),
            loaded_ago_seconds: snapshot.loaded_at.elapsed().as_secs(),
            reloads: snapshot.reloads,
            frontends: snapshot.frontend_count(),
            backends: snapshot.backend_count(),
        },
    })
}
