//! Registry HTTP application wiring.
//!
//! Builds the axum router, attaches tracing middleware, and defines the shared
//! state handed to every handler.
use crate::api;
use crate::config::{RegistryConfig, StorageBackend};
use crate::observability;
use crate::registry::clock::{Clock, SystemClock};
use crate::registry::{Registry, RegistrySettings};
use crate::store::RegistryStore;
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/health", get(api::system::health))
        .route("/ready", get(api::system::ready))
        .route("/stats", get(api::system::stats))
        .route("/openapi.json", get(api::openapi::openapi_json))
        .route(
            "/namespaces",
            get(api::namespaces::list_namespaces).post(api::namespaces::create_namespace),
        )
        .route(
            "/namespaces/:namespace_id",
            get(api::namespaces::get_namespace).patch(api::namespaces::patch_namespace),
        )
        .route(
            "/namespaces/:namespace_id/route",
            get(api::namespaces::route_between),
        )
        .route(
            "/namespaces/:namespace_id/membranes/:membrane_id",
            get(api::membranes::get_membrane).delete(api::membranes::deregister_membrane),
        )
        .route(
            "/namespaces/:namespace_id/membranes/:membrane_id/reactivate",
            post(api::membranes::reactivate_membrane),
        )
        .route(
            "/membranes/register",
            post(api::membranes::register_membrane),
        )
        .route(
            "/membranes/discover",
            get(api::membranes::discover_membranes),
        )
        .route(
            "/membranes/:membrane_id/heartbeat",
            post(api::membranes::heartbeat),
        )
        .layer(trace_layer)
        .with_state(state)
}

/// Open the configured store and wrap it in a registry on the system clock.
pub async fn build_state(config: &RegistryConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn RegistryStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect postgres store")?,
            )
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "registry store ready"
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Registry::new(
        store,
        clock,
        RegistrySettings {
            stale_threshold: config.stale_threshold,
            reactivate_on_heartbeat: config.reactivate_on_heartbeat,
        },
    );
    Ok(AppState { registry })
}
