//! HTTP API over the device orchestrator.
//!
//! ## Endpoints
//!
//! - `POST /v1/virtio-blks` - Attach a device
//! - `GET /v1/virtio-blks` - List attached devices
//! - `GET /v1/virtio-blks/:id` - Get one device
//! - `DELETE /v1/virtio-blks/:id` - Detach a device
//! - `GET /health` - Health check

use crate::error::{ApiError, Result};
use crate::registry::VirtioBlkRegistry;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use spindle_core::{naming, DeviceOrchestrator, KvmError, VirtioBlk};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state of the API handlers.
pub struct AppState {
    orchestrator: DeviceOrchestrator,
    registry: VirtioBlkRegistry,
    request_timeout: Duration,
}

impl AppState {
    /// Create handler state with an empty registry.
    pub fn new(orchestrator: DeviceOrchestrator, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            registry: VirtioBlkRegistry::new(),
            request_timeout,
        }
    }

    /// The device registry.
    pub fn registry(&self) -> &VirtioBlkRegistry {
        &self.registry
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    tracing::debug!("Building HTTP router");

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/v1/virtio-blks",
            get(list_virtio_blks).post(create_virtio_blk),
        )
        .route(
            "/v1/virtio-blks/:id",
            get(get_virtio_blk).delete(delete_virtio_blk),
        )
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "spindle-server"
    }))
}

async fn list_virtio_blks(State(state): State<Arc<AppState>>) -> Json<Vec<VirtioBlk>> {
    Json(state.registry.list().await)
}

async fn get_virtio_blk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VirtioBlk>> {
    state
        .registry
        .get(&id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// Register a device and attach it.
///
/// The record goes in before attach starts. It is dropped again only when
/// attach failed before the storage engine created anything; otherwise it
/// stays so that DELETE can clean up the leftovers.
async fn create_virtio_blk(
    State(state): State<Arc<AppState>>,
    Json(device): Json<VirtioBlk>,
) -> Result<Json<VirtioBlk>> {
    if !naming::is_valid_device_id(&device.id) {
        return Err(ApiError::InvalidRequest(format!(
            "id {:?} must be non-empty ASCII alphanumerics, '-', '_' or '.'",
            device.id
        )));
    }
    if device.volume_id.is_empty() {
        return Err(ApiError::InvalidRequest("volume_id is required".into()));
    }

    let _claim = state
        .registry
        .try_reserve(&device.id)
        .ok_or_else(|| ApiError::Conflict(format!("{} has an operation in progress", device.id)))?;
    if state.registry.contains(&device.id).await {
        return Err(ApiError::Conflict(format!("{} already exists", device.id)));
    }

    state.registry.insert(device.clone()).await;

    match state
        .orchestrator
        .attach_until(&device, Some(state.deadline()))
        .await
    {
        Ok(attached) => Ok(Json(attached)),
        Err(e @ (KvmError::StorageEngineCall(_) | KvmError::InvalidDeviceId(_))) => {
            state.registry.remove(&device.id).await;
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(
                device_id = %device.id,
                error = %e,
                "Attach failed after controller creation, keeping record"
            );
            Err(e.into())
        }
    }
}

/// Detach a device; the record is dropped only once fully detached.
async fn delete_virtio_blk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let _claim = state
        .registry
        .try_reserve(&id)
        .ok_or_else(|| ApiError::Conflict(format!("{id} has an operation in progress")))?;
    if !state.registry.contains(&id).await {
        return Err(ApiError::NotFound(id));
    }

    state
        .orchestrator
        .detach_until(&id, Some(state.deadline()))
        .await?;
    state.registry.remove(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    state: Arc<AppState>,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::result::Result<(), std::io::Error> {
    let router = build_router(state);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
