//! Namespace API handlers.
use crate::api::error::{ApiError, registry_error};
use crate::api::types::{
    NamespaceCreateRequest, NamespaceCreated, NamespaceListResponse, NamespacePatchRequest,
    RouteParams, RouteResponse,
};
use crate::api::{json_body, parse_namespace_id, required};
use crate::app::AppState;
use crate::model::Namespace;
use crate::registry::NewNamespace;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[utoipa::path(
    post,
    path = "/namespaces",
    tag = "namespaces",
    request_body = NamespaceCreateRequest,
    responses(
        (status = 201, description = "Namespace created", body = NamespaceCreated),
        (status = 400, description = "Invalid input or duplicate name", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_namespace(
    State(state): State<AppState>,
    payload: Result<Json<NamespaceCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(payload)?;
    let name = required("name", body.name)?;
    let parent_namespace = body
        .parent_namespace
        .as_deref()
        .map(parse_namespace_id)
        .transpose()?;
    let namespace_id = state
        .registry
        .create_namespace(NewNamespace {
            name,
            description: body.description.unwrap_or_default(),
            parent_namespace,
            metadata: body.metadata.unwrap_or_default(),
        })
        .await
        .map_err(|err| registry_error("failed to create namespace", err))?;
    Ok((
        StatusCode::CREATED,
        Json(NamespaceCreated {
            namespace_id: namespace_id.to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/namespaces",
    tag = "namespaces",
    responses(
        (status = 200, description = "All namespaces", body = NamespaceListResponse)
    )
)]
pub(crate) async fn list_namespaces(
    State(state): State<AppState>,
) -> Result<Json<NamespaceListResponse>, ApiError> {
    let namespaces = state
        .registry
        .list_namespaces()
        .await
        .map_err(|err| registry_error("failed to list namespaces", err))?;
    Ok(Json(NamespaceListResponse { namespaces }))
}

#[utoipa::path(
    get,
    path = "/namespaces/{namespace_id}",
    tag = "namespaces",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier")
    ),
    responses(
        (status = 200, description = "Namespace", body = Namespace),
        (status = 404, description = "Namespace not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_namespace(
    Path(namespace_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Namespace>, ApiError> {
    let id = parse_namespace_id(&namespace_id)?;
    let namespace = state
        .registry
        .get_namespace(id)
        .await
        .map_err(|err| registry_error("failed to load namespace", err))?;
    Ok(Json(namespace))
}

#[utoipa::path(
    patch,
    path = "/namespaces/{namespace_id}",
    tag = "namespaces",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier")
    ),
    request_body = NamespacePatchRequest,
    responses(
        (status = 200, description = "Namespace updated", body = Namespace),
        (status = 400, description = "Invalid input", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Namespace not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn patch_namespace(
    Path(namespace_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<NamespacePatchRequest>, JsonRejection>,
) -> Result<Json<Namespace>, ApiError> {
    let id = parse_namespace_id(&namespace_id)?;
    let body = json_body(payload)?;
    let namespace = state
        .registry
        .update_namespace_metadata(id, body.metadata)
        .await
        .map_err(|err| registry_error("failed to update namespace", err))?;
    Ok(Json(namespace))
}

#[utoipa::path(
    get,
    path = "/namespaces/{namespace_id}/route",
    tag = "namespaces",
    params(
        ("namespace_id" = String, Path, description = "Namespace identifier"),
        RouteParams
    ),
    responses(
        (status = 200, description = "Hops from source to target", body = RouteResponse),
        (status = 400, description = "Missing from/to", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Namespace or membrane not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Hierarchy cannot be routed", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn route_between(
    Path(namespace_id): Path<String>,
    Query(params): Query<RouteParams>,
    State(state): State<AppState>,
) -> Result<Json<RouteResponse>, ApiError> {
    let id = parse_namespace_id(&namespace_id)?;
    let from = required("from", params.from)?;
    let to = required("to", params.to)?;
    let path = state
        .registry
        .route(id, &from, &to)
        .await
        .map_err(|err| registry_error("failed to compute route", err))?;
    Ok(Json(RouteResponse { path }))
}
