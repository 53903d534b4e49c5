use chrono::{DateTime, Utc};
use membrane_common::Metadata;
use membrane_common::ids::NamespaceId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A named grouping of membranes.
///
/// `name` is unique across the registry. `parent_namespace` is a single-level
/// pointer and is not checked for cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Namespace {
    #[schema(value_type = String, format = Uuid)]
    pub id: NamespaceId,
    pub name: String,
    pub description: String,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub parent_namespace: Option<NamespaceId>,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
