//! HTTP API for health checks, Prometheus metrics and device requests

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use gpp_lib::{
    host::ExecuteRequest, ComponentStatus, GppDevice, GppError, HealthRegistry, NicAllocation,
    Pid, PropertyUpdate,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub device: Arc<GppDevice>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, device: Arc<GppDevice>) -> Self {
        Self {
            health_registry,
            device,
        }
    }
}

/// Device error rendered as an HTTP response
pub struct ApiError(GppError);

impl From<GppError> for ApiError {
    fn from(err: GppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0 {
            GppError::InvalidCapacity {
                capacity, request, ..
            } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "capacity": capacity, "request": request }),
            ),
            GppError::InvalidProperty { property, .. } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "property": property }),
            ),
            GppError::ExecuteFailure(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": message }))
            }
            GppError::InvalidProcess(_) | GppError::InvalidState(_) => {
                (StatusCode::CONFLICT, json!({ "error": message }))
            }
            _ => {
                warn!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub delta: f64,
}

#[derive(Debug, Deserialize)]
pub struct MemoryRequest {
    pub bytes: i64,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still cycling
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the first cycle has completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.device.status())
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let pid = state.device.execute(request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "pid": pid }))))
}

async fn terminate(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<Pid>,
) -> ApiResult<StatusCode> {
    state.device.terminate(pid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn allocate_nic(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NicAllocation>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.device.allocate_nic(&request)?))
}

async fn deallocate_nic(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NicAllocation>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.device.deallocate_nic(&request)?))
}

async fn allocate_load(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> ApiResult<impl IntoResponse> {
    let allocated = state.device.allocate_load(request.delta).await?;
    Ok(Json(json!({ "allocated": allocated })))
}

async fn deallocate_load(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> StatusCode {
    state.device.deallocate_load(request.delta);
    StatusCode::NO_CONTENT
}

async fn allocate_memory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let allocated = state.device.allocate_mem_capacity(request.bytes)?;
    Ok(Json(json!({ "allocated": allocated })))
}

async fn configure(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PropertyUpdate>,
) -> ApiResult<impl IntoResponse> {
    state.device.apply(&update)?;
    Ok(Json(state.device.status()))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/execute", post(execute))
        .route("/processes/:pid", delete(terminate))
        .route("/allocations/nic", post(allocate_nic).delete(deallocate_nic))
        .route("/allocations/load", post(allocate_load).delete(deallocate_load))
        .route("/allocations/memory", post(allocate_memory))
        .route("/configure", post(configure))
        .with_state(state)
}

/// Start the API server; returns once shutdown is signalled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
