//! Registry HTTP API.
//!
//! Handlers are thin: they validate input, call the registry core, and map
//! core errors through [`error::registry_error`].
pub mod error;
pub mod membranes;
pub mod namespaces;
pub mod openapi;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_validation_error};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use membrane_common::ids::NamespaceId;

pub(crate) fn parse_namespace_id(raw: &str) -> Result<NamespaceId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| api_validation_error(&format!("invalid namespace_id: {raw}")))
}

/// Unwrap a JSON body, turning extractor rejections into 400s.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| api_validation_error(&rejection.body_text()))
}

/// Trimmed, non-empty string field or a 400 naming the field.
pub(crate) fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(api_validation_error(&format!("{field} is required"))),
    }
}
