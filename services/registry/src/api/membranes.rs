//! Membrane API handlers: register, discover, heartbeat, lookup, reactivate,
//! and deregister.
use crate::api::error::{ApiError, registry_error};
use crate::api::types::{
    DiscoverParams, MembraneListResponse, MembraneRegisterRequest, MembraneRegistered,
    StatusResponse,
};
use crate::api::{json_body, parse_namespace_id, required};
use crate::app::AppState;
use crate::model::MembraneView;
use crate::registry::{DiscoverQuery, NewMembrane};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use membrane_common::CommunicationMode;
use membrane_common::ids::NamespaceId;

const DEFAULT_HOST: &str = "localhost";

#[utoipa::path(
    post,
    path = "/membranes/register",
    tag = "membranes",
    request_body = MembraneRegisterRequest,
    responses(
        (status = 201, description = "Membrane registered", body = MembraneRegistered),
        (status = 400, description = "Invalid input, unknown namespace, or duplicate membrane", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn register_membrane(
    State(state): State<AppState>,
    payload: Result<Json<MembraneRegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(payload)?;
    let namespace_id = parse_namespace_id(&required("namespace_id", body.namespace_id)?)?;
    let membrane_id = required("membrane_id", body.membrane_id)?;
    let host = body
        .host
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let parent_membrane = body
        .parent_membrane
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let record_id = state
        .registry
        .register_membrane(NewMembrane {
            namespace_id,
            membrane_id,
            host,
            port: body.port,
            parent_membrane,
            capabilities: body.capabilities.unwrap_or_default(),
            metadata: body.metadata.unwrap_or_default(),
        })
        .await
        .map_err(|err| registry_error("failed to register membrane", err))?;
    Ok((
        StatusCode::CREATED,
        Json(MembraneRegistered {
            record_id: record_id.to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/membranes/discover",
    tag = "membranes",
    params(DiscoverParams),
    responses(
        (status = 200, description = "Active membranes", body = MembraneListResponse)
    )
)]
pub(crate) async fn discover_membranes(
    Query(params): Query<DiscoverParams>,
    State(state): State<AppState>,
) -> Result<Json<MembraneListResponse>, ApiError> {
    let namespace_id = match params.namespace_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<NamespaceId>() {
            Ok(id) => Some(id),
            // No namespace can carry a malformed id.
            Err(_) => return Ok(Json(MembraneListResponse { membranes: Vec::new() })),
        },
    };
    let communication_mode = match params.communication_mode.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<CommunicationMode>() {
            Ok(mode) => Some(mode),
            Err(_) => return Ok(Json(MembraneListResponse { membranes: Vec::new() })),
        },
    };
    let membranes = state
        .registry
        .discover_membranes(DiscoverQuery {
            namespace_id,
            parent_membrane: params.parent_membrane.filter(|p| !p.is_empty()),
            communication_mode,
        })
        .await
        .map_err(|err| registry_error("failed to discover membranes", err))?;
    Ok(Json(MembraneListResponse { membranes }))
}

#[utoipa::path(
    post,
    path = "/membranes/{membrane_id}/heartbeat",
    tag = "membranes",
    params(
        ("membrane_id" = String, Path, description = "Logical membrane id")
    ),
    responses(
        (status = 200, description = "Heartbeat recorded (unknown ids are ignored)", body = StatusResponse)
    )
)]
pub(crate) async fn heartbeat(
    Path(membrane_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .registry
        .heartbeat(&membrane_id)
        .await
        .map_err(|err| registry_error("failed to record heartbeat", err))?;
    Ok(Json(StatusResponse {
        status: "updated".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/namespaces/{namespace_id}/membranes/{membrane_id}",
    tag = "membranes",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier"),
        ("membrane_id" = String, Path, description = "Logical membrane id")
    ),
    responses(
        (status = 200, description = "Membrane record, including stale ones", body = MembraneView),
        (status = 404, description = "Membrane not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_membrane(
    Path((namespace_id, membrane_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<MembraneView>, ApiError> {
    let namespace_id = parse_namespace_id(&namespace_id)?;
    let view = state
        .registry
        .get_membrane(namespace_id, &membrane_id)
        .await
        .map_err(|err| registry_error("failed to load membrane", err))?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/namespaces/{namespace_id}/membranes/{membrane_id}/reactivate",
    tag = "membranes",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier"),
        ("membrane_id" = String, Path, description = "Logical membrane id")
    ),
    responses(
        (status = 200, description = "Membrane active again", body = StatusResponse),
        (status = 404, description = "Membrane not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn reactivate_membrane(
    Path((namespace_id, membrane_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let namespace_id = parse_namespace_id(&namespace_id)?;
    state
        .registry
        .reactivate_membrane(namespace_id, &membrane_id)
        .await
        .map_err(|err| registry_error("failed to reactivate membrane", err))?;
    Ok(Json(StatusResponse {
        status: "reactivated".to_string(),
    }))
}

#[utoipa::path(
    delete,
    path = "/namespaces/{namespace_id}/membranes/{membrane_id}",
    tag = "membranes",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier"),
        ("membrane_id" = String, Path, description = "Logical membrane id")
    ),
    responses(
        (status = 204, description = "Membrane deregistered"),
        (status = 404, description = "Membrane not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn deregister_membrane(
    Path((namespace_id, membrane_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let namespace_id = parse_namespace_id(&namespace_id)?;
    state
        .registry
        .deregister_membrane(namespace_id, &membrane_id)
        .await
        .map_err(|err| registry_error("failed to deregister membrane", err))?;
    Ok(StatusCode::NO_CONTENT)
}
