//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Keeps error bodies uniform across registry endpoints and translates
//! registry core failures into status codes.
//!
//! # Key invariants
//! - Every error body carries a stable `code` and a human-readable `error`.
//! - Storage details are logged server side and never returned to clients.
use crate::api::types::ErrorResponse;
use crate::registry::RegistryError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            error: message.to_string(),
        },
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// 400 for client errors that are not worth retrying as-is.
pub fn api_client_error(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, code, message)
}

pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Log the underlying failure and return a generic 500.
pub fn api_internal(message: &str, err: &dyn std::error::Error) -> ApiError {
    tracing::error!(error = %err, "registry storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Map a registry core error to its HTTP shape. `context` is the generic
/// message used when the failure is internal.
pub fn registry_error(context: &str, err: RegistryError) -> ApiError {
    match err {
        RegistryError::DuplicateKey(detail) => api_client_error("duplicate_key", &detail),
        RegistryError::UnknownNamespace(id) => {
            api_client_error("unknown_namespace", &format!("namespace {id} does not exist"))
        }
        RegistryError::NotFound(detail) => api_not_found(&format!("{detail} not found")),
        RegistryError::Route(route) => api_conflict("route_error", &route.to_string()),
        RegistryError::Storage(store) => api_internal(context, &store),
    }
}
