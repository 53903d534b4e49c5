#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use membrane_registry::app::{AppState, build_router};
use membrane_registry::registry::clock::ManualClock;
use membrane_registry::registry::{Registry, RegistrySettings};
use membrane_registry::store::memory::InMemoryStore;
use std::sync::Arc;

pub type App = axum::routing::RouterIntoService<Body, ()>;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// In-memory app on a manual clock, plus the registry for driving sweeps.
pub fn app_with_clock(settings: RegistrySettings) -> (App, Registry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let registry = Registry::new(Arc::new(InMemoryStore::new()), clock.clone(), settings);
    let app = build_router(AppState {
        registry: registry.clone(),
    })
    .into_service();
    (app, registry, clock)
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}
