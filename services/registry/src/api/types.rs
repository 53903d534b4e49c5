//! Request and response bodies for the registry HTTP API.
use crate::model::{MembraneView, Namespace};
use chrono::{DateTime, Utc};
use membrane_common::Metadata;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadinessStatus {
    pub status: String,
    pub backend: String,
    pub durable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub namespaces: u64,
    pub active_membranes: u64,
    pub stale_membranes: u64,
    pub timestamp: DateTime<Utc>,
}

// Fields are optional on the wire so missing values become 400s with a
// message instead of extractor rejections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NamespaceCreateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_namespace: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NamespaceCreated {
    pub namespace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NamespaceListResponse {
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NamespacePatchRequest {
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MembraneRegisterRequest {
    #[serde(default)]
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub membrane_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub parent_membrane: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembraneRegistered {
    pub record_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DiscoverParams {
    /// Only return membranes in this namespace.
    pub namespace_id: Option<String>,
    /// Only return direct children of this membrane id.
    pub parent_membrane: Option<String>,
    /// Only return membranes advertising this mode (`shared-volume`, `network`, `ipc`).
    pub communication_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembraneListResponse {
    pub membranes: Vec<MembraneView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RouteParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteResponse {
    pub path: Vec<String>,
}
