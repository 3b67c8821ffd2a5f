//! REST API Handlers
//!
//! Implements the REST API endpoints for volume provisioning, backend
//! inspection and capability refresh.

use crate::controlplane::workflows::VolumeRequest;
use crate::controlplane::Orchestrator;
use crate::error::{Error, ErrorCategory, Result};
use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume create request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeBody {
    /// Volume name as known to the caller
    pub name: String,
    /// Capacity (e.g., "100Gi", "1Ti")
    pub capacity: String,
    /// Volume parameters (storagepool, alloctype, clonefrom, ...)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match self.category() {
            ErrorCategory::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorCategory::Validation => (StatusCode::BAD_REQUEST, "invalid_request"),
            ErrorCategory::BackendUnreachable => {
                (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
            }
            ErrorCategory::PartialFailure => (StatusCode::BAD_GATEWAY, "partial_failure"),
            ErrorCategory::Config | ErrorCategory::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let details = self.is_retryable().then(|| "retryable".to_string());

        (
            status,
            Json(ApiErrorResponse {
                error: code.into(),
                message: self.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
    max_body_size: usize,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            max_body_size: 1024 * 1024,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any);

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume))
            .route("/v1/volumes/:handle", delete(delete_volume))
            // Backend endpoints
            .route("/v1/backends", get(list_backends))
            .route("/v1/backends/:name", get(get_backend))
            .route("/v1/capabilities/refresh", post(refresh_capabilities))
            .route("/v1/status", get(get_status))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state)
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a volume
async fn create_volume(
    State(state): State<AppState>,
    Json(body): Json<CreateVolumeBody>,
) -> Result<impl IntoResponse> {
    info!("Create volume request: {} ({})", body.name, body.capacity);

    let capacity_bytes = parse_capacity(&body.capacity)?;
    let request = VolumeRequest::from_parameters(body.name, capacity_bytes, &body.parameters)?;

    let volume = state.orchestrator.provision_volume(request).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

/// Delete a volume by handle
async fn delete_volume(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<StatusCode> {
    state.orchestrator.delete_volume(&handle).await.map_err(|e| {
        error!("Delete of {} failed: {}", handle, e);
        e
    })?;
    Ok(StatusCode::NO_CONTENT)
}

/// List backends
async fn list_backends(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.backends())
}

/// Get one backend
async fn get_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    state
        .orchestrator
        .backend(&name)
        .map(Json)
        .ok_or(Error::BackendNotFound { backend: name })
}

/// Refresh every backend now
async fn refresh_capabilities(State(state): State<AppState>) -> Result<impl IntoResponse> {
    if let Err(e) = state.orchestrator.refresh_capabilities_now().await {
        warn!("On-demand capability refresh failed: {}", e);
        return Err(e);
    }
    Ok(Json(state.orchestrator.status()))
}

/// Orchestrator status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.status())
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.registry().is_synced() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "backends not synced")
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::ApiValidation("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::ApiValidation(format!("invalid capacity number: {}", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KI" | "KIB" => 1 << 10,
        "M" | "MI" | "MIB" => 1 << 20,
        "G" | "GI" | "GIB" => 1 << 30,
        "T" | "TI" | "TIB" => 1 << 40,
        "P" | "PI" | "PIB" => 1 << 50,
        _ => {
            return Err(Error::ApiValidation(format!(
                "unknown capacity unit: {}",
                unit_str
            )))
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::ApiValidation(format!("capacity {} overflows", s)))
}
