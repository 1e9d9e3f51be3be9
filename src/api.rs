//! Read-only views of the merged configuration, plus the REST provider's
//! write endpoint.
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | GET | `/api`, `/api/providers` | every provider's configuration |
//! | GET | `/api/providers/{provider}` | one provider's configuration |
//! | GET | `/api/providers/{provider}/backends[/{backend}]` | backends |
//! | GET | `/api/providers/{provider}/frontends[/{frontend}]` | frontends |
//! | PUT | `/api/providers/rest` | publish a configuration |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::provider::rest::{self, PublishError};
use crate::server::AppState;
use crate::types::{Backend, Configuration, Configurations, Frontend};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api", get(list_providers))
        .route("/api/providers", get(list_providers))
        .route(
            "/api/providers/{provider}",
            get(get_provider).put(put_provider),
        )
        .route("/api/providers/{provider}/backends", get(list_backends))
        .route(
            "/api/providers/{provider}/backends/{backend}",
            get(get_backend),
        )
        .route("/api/providers/{provider}/frontends", get(list_frontends))
        .route(
            "/api/providers/{provider}/frontends/{frontend}",
            get(get_frontend),
        )
}

fn provider_configuration(state: &AppState, provider: &str) -> Result<Configuration, ApiError> {
    state
        .current()
        .configurations
        .get(provider)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("provider '{provider}' has no configuration")))
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Configurations> {
    Json(state.current().configurations.clone())
}

async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<Configuration>, ApiError> {
    provider_configuration(&state, &provider).map(Json)
}

async fn list_backends(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<BTreeMap<String, Backend>>, ApiError> {
    provider_configuration(&state, &provider).map(|c| Json(c.backends))
}

async fn get_backend(
    State(state): State<Arc<AppState>>,
    Path((provider, backend)): Path<(String, String)>,
) -> Result<Json<Backend>, ApiError> {
    let mut configuration = provider_configuration(&state, &provider)?;
    configuration
        .backends
        .remove(&backend)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("backend '{backend}' not found in '{provider}'")))
}

async fn list_frontends(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<BTreeMap<String, Frontend>>, ApiError> {
    provider_configuration(&state, &provider).map(|c| Json(c.frontends))
}

async fn get_frontend(
    State(state): State<Arc<AppState>>,
    Path((provider, frontend)): Path<(String, String)>,
) -> Result<Json<Frontend>, ApiError> {
    let mut configuration = provider_configuration(&state, &provider)?;
    configuration
        .frontends
        .remove(&frontend)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("frontend '{frontend}' not found in '{provider}'")))
}

/// Decode the body and hand it to the REST provider. Nothing is published
/// unless the whole body decodes.
async fn put_provider(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<Configuration>, ApiError> {
    if provider != rest::PROVIDER_NAME {
        return Err(ApiError::BadRequest(format!(
            "provider '{provider}' is read-only, only '{}' accepts updates",
            rest::PROVIDER_NAME
        )));
    }
    let endpoint = state
        .rest
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("rest provider is not enabled".into()))?;

    let configuration: Configuration = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(provider = %provider, error = %e, "rejecting malformed configuration");
        ApiError::BadRequest(format!("invalid configuration: {e}"))
    })?;

    endpoint
        .publish(configuration.clone())
        .await
        .map_err(|e: PublishError| ApiError::Unavailable(e.to_string()))?;

    tracing::info!(
        provider = %provider,
        frontends = configuration.frontends.len(),
        backends = configuration.backends.len(),
        "configuration accepted"
    );
    Ok(Json(configuration))
}
