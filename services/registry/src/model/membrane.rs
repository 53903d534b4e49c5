use chrono::{DateTime, Utc};
use membrane_common::ids::{NamespaceId, RecordId};
use membrane_common::{CommunicationMode, MembraneStatus, Metadata};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A registered membrane.
///
/// `(namespace_id, membrane_id)` is unique. `parent_membrane` names another
/// membrane by its logical id and is never validated, so it may dangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membrane {
    pub id: RecordId,
    pub namespace_id: NamespaceId,
    pub membrane_id: String,
    pub parent_membrane: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub status: MembraneStatus,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Membrane {
    pub fn into_view(self, namespace_name: String) -> MembraneView {
        MembraneView {
            id: self.id,
            namespace_id: self.namespace_id,
            namespace_name,
            membrane_id: self.membrane_id,
            parent_membrane: self.parent_membrane,
            host: self.host,
            port: self.port,
            status: self.status,
            capabilities: self.capabilities,
            last_heartbeat: self.last_heartbeat,
            created_at: self.created_at,
            metadata: self.metadata,
        }
    }
}

/// A membrane joined with the name of its namespace at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MembraneView {
    #[schema(value_type = String, format = Uuid)]
    pub id: RecordId,
    #[schema(value_type = String, format = Uuid)]
    pub namespace_id: NamespaceId,
    pub namespace_name: String,
    pub membrane_id: String,
    pub parent_membrane: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    #[schema(value_type = String, example = "active")]
    pub status: MembraneStatus,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembraneFilter {
    pub namespace_id: Option<NamespaceId>,
    pub status: Option<MembraneStatus>,
    pub parent_membrane: Option<String>,
    /// Matches the advertised `communication_mode` metadata; records without
    /// one count as `network`, records with an unreadable one never match.
    pub communication_mode: Option<CommunicationMode>,
}

impl MembraneFilter {
    pub fn matches(&self, membrane: &Membrane) -> bool {
        if let Some(namespace_id) = self.namespace_id
            && membrane.namespace_id != namespace_id
        {
            return false;
        }
        if let Some(status) = self.status
            && membrane.status != status
        {
            return false;
        }
        if let Some(parent) = &self.parent_membrane
            && membrane.parent_membrane.as_deref() != Some(parent.as_str())
        {
            return false;
        }
        if let Some(mode) = self.communication_mode
            && CommunicationMode::from_metadata(&membrane.metadata).ok() != Some(mode)
        {
            return false;
        }
        true
    }
}
