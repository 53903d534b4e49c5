//! Liveness, readiness, and stats handlers.
//!
//! `/health` never touches storage so orchestrators can tell a live process
//! from a healthy dependency; `/ready` probes the store.
use crate::api::error::{ApiError, api_internal, registry_error};
use crate::api::types::{HealthStatus, ReadinessStatus, StatsResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Process is accepting requests", body = HealthStatus)
    )
)]
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: state.registry.now(),
    })
}

#[utoipa::path(
    get,
    path = "/ready",
    tag = "system",
    responses(
        (status = 200, description = "Storage reachable", body = ReadinessStatus),
        (status = 500, description = "Storage unavailable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessStatus>, ApiError> {
    let store = state.registry.store();
    if let Err(err) = store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(ReadinessStatus {
        status: "ready".to_string(),
        backend: store.backend_name().to_string(),
        durable: store.is_durable(),
    }))
}

#[utoipa::path(
    get,
    path = "/stats",
    tag = "system",
    responses(
        (status = 200, description = "Registry counts", body = StatsResponse)
    )
)]
pub(crate) async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .registry
        .stats()
        .await
        .map_err(|err| registry_error("failed to load stats", err))?;
    Ok(Json(StatsResponse {
        namespaces: stats.counts.namespaces,
        active_membranes: stats.counts.active_membranes,
        stale_membranes: stats.counts.stale_membranes,
        timestamp: stats.timestamp,
    }))
}
