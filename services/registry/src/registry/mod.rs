//! Registry core.
//!
//! # Purpose
//! Enforces the registry's invariants on top of a [`RegistryStore`] and exposes
//! transport-independent operations. The API layer maps these 1:1 onto HTTP.
//!
//! # Key invariants
//! - No state is cached between calls; every operation reads or writes through
//!   the store, so several registry processes can share one database.
//! - Discovery only ever returns `active` records.
//! - Heartbeats for unknown ids succeed without touching anything.
//! - Storage failures surface as [`RegistryError::Storage`] and are never
//!   swallowed.
pub mod clock;
pub mod sweep;

use crate::model::{
    HeartbeatUpdate, Membrane, MembraneFilter, MembraneView, Namespace, RegistryCounts,
};
use crate::observability::names;
use crate::store::{RegistryStore, StoreError};
use chrono::{DateTime, Utc};
use clock::Clock;
use membrane_common::ids::{NamespaceId, RecordId};
use membrane_common::{CommunicationMode, MembraneStatus, Metadata};
use membrane_router::{Hierarchy, RouteError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("unknown namespace: {0}")]
    UnknownNamespace(NamespaceId),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub stale_threshold: Duration,
    /// When set, a heartbeat flips a `stale` record back to `active`.
    pub reactivate_on_heartbeat: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(crate::config::DEFAULT_STALE_THRESHOLD_SECS),
            reactivate_on_heartbeat: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewNamespace {
    pub name: String,
    pub description: String,
    pub parent_namespace: Option<NamespaceId>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct NewMembrane {
    pub namespace_id: NamespaceId,
    pub membrane_id: String,
    pub host: String,
    pub port: Option<u16>,
    pub parent_membrane: Option<String>,
    pub capabilities: Vec<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverQuery {
    pub namespace_id: Option<NamespaceId>,
    pub parent_membrane: Option<String>,
    pub communication_mode: Option<CommunicationMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub counts: RegistryCounts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    settings: RegistrySettings,
}

fn storage(err: StoreError) -> RegistryError {
    RegistryError::Storage(err)
}

impl Registry {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_namespace(&self, request: NewNamespace) -> RegistryResult<NamespaceId> {
        let now = self.clock.now();
        let namespace = Namespace {
            id: NamespaceId::new(),
            name: request.name,
            description: request.description,
            parent_namespace: request.parent_namespace,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };
        match self.store.insert_namespace(namespace).await {
            Ok(namespace) => {
                tracing::info!(
                    namespace_id = %namespace.id,
                    name = %namespace.name,
                    "namespace created"
                );
                Ok(namespace.id)
            }
            Err(StoreError::Conflict(detail)) => Err(RegistryError::DuplicateKey(detail)),
            Err(err) => Err(storage(err)),
        }
    }

    pub async fn list_namespaces(&self) -> RegistryResult<Vec<Namespace>> {
        self.store.list_namespaces().await.map_err(storage)
    }

    pub async fn get_namespace(&self, id: NamespaceId) -> RegistryResult<Namespace> {
        match self.store.get_namespace(id).await {
            Ok(namespace) => Ok(namespace),
            Err(StoreError::NotFound(_)) => Err(RegistryError::NotFound(format!("namespace {id}"))),
            Err(err) => Err(storage(err)),
        }
    }

    pub async fn update_namespace_metadata(
        &self,
        id: NamespaceId,
        metadata: Metadata,
    ) -> RegistryResult<Namespace> {
        match self
            .store
            .update_namespace_metadata(id, metadata, self.clock.now())
            .await
        {
            Ok(namespace) => Ok(namespace),
            Err(StoreError::NotFound(_)) => Err(RegistryError::NotFound(format!("namespace {id}"))),
            Err(err) => Err(storage(err)),
        }
    }

    pub async fn register_membrane(&self, request: NewMembrane) -> RegistryResult<RecordId> {
        let now = self.clock.now();
        let mut capabilities = request.capabilities;
        capabilities.sort();
        capabilities.dedup();
        let membrane = Membrane {
            id: RecordId::new(),
            namespace_id: request.namespace_id,
            membrane_id: request.membrane_id,
            parent_membrane: request.parent_membrane,
            host: request.host,
            port: request.port,
            status: MembraneStatus::Active,
            capabilities,
            last_heartbeat: now,
            created_at: now,
            metadata: request.metadata,
        };
        match self.store.insert_membrane(membrane).await {
            Ok(membrane) => {
                metrics::counter!(names::REGISTRATIONS).increment(1);
                tracing::info!(
                    namespace_id = %membrane.namespace_id,
                    membrane_id = %membrane.membrane_id,
                    parent = ?membrane.parent_membrane,
                    "membrane registered"
                );
                Ok(membrane.id)
            }
            Err(StoreError::Conflict(detail)) => Err(RegistryError::DuplicateKey(detail)),
            Err(StoreError::NotFound(_)) => {
                Err(RegistryError::UnknownNamespace(request.namespace_id))
            }
            Err(err) => Err(storage(err)),
        }
    }

    /// Active membranes matching the query. Stale records are never returned.
    pub async fn discover_membranes(
        &self,
        query: DiscoverQuery,
    ) -> RegistryResult<Vec<MembraneView>> {
        let filter = MembraneFilter {
            namespace_id: query.namespace_id,
            status: Some(MembraneStatus::Active),
            parent_membrane: query.parent_membrane,
            communication_mode: query.communication_mode,
        };
        self.store.query_membranes(&filter).await.map_err(storage)
    }

    /// Look up one record regardless of status.
    pub async fn get_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> RegistryResult<MembraneView> {
        match self.store.get_membrane(namespace_id, membrane_id).await {
            Ok(view) => Ok(view),
            Err(StoreError::NotFound(_)) => Err(RegistryError::NotFound(format!(
                "membrane {membrane_id} in namespace {namespace_id}"
            ))),
            Err(err) => Err(storage(err)),
        }
    }

    /// Record a liveness signal for every record carrying `membrane_id`.
    ///
    /// The update is not scoped to a namespace. Unknown ids are a no-op.
    pub async fn heartbeat(&self, membrane_id: &str) -> RegistryResult<HeartbeatUpdate> {
        let update = self
            .store
            .update_membrane_heartbeat(
                membrane_id,
                self.clock.now(),
                self.settings.reactivate_on_heartbeat,
            )
            .await
            .map_err(storage)?;
        metrics::counter!(names::HEARTBEATS).increment(1);
        if update.records == 0 {
            tracing::debug!(membrane_id, "heartbeat for unknown membrane ignored");
        } else if update.namespaces > 1 {
            tracing::warn!(
                membrane_id,
                records = update.records,
                namespaces = update.namespaces,
                "heartbeat updated membranes in more than one namespace"
            );
        }
        Ok(update)
    }

    pub async fn reactivate_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> RegistryResult<()> {
        match self
            .store
            .reactivate_membrane(namespace_id, membrane_id, self.clock.now())
            .await
        {
            Ok(()) => {
                tracing::info!(%namespace_id, membrane_id, "membrane reactivated");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(RegistryError::NotFound(format!(
                "membrane {membrane_id} in namespace {namespace_id}"
            ))),
            Err(err) => Err(storage(err)),
        }
    }

    pub async fn deregister_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> RegistryResult<()> {
        match self.store.delete_membrane(namespace_id, membrane_id).await {
            Ok(()) => {
                tracing::info!(%namespace_id, membrane_id, "membrane deregistered");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(RegistryError::NotFound(format!(
                "membrane {membrane_id} in namespace {namespace_id}"
            ))),
            Err(err) => Err(storage(err)),
        }
    }

    pub async fn stats(&self) -> RegistryResult<RegistryStats> {
        let counts = self.store.counts().await.map_err(storage)?;
        Ok(RegistryStats {
            counts,
            timestamp: self.clock.now(),
        })
    }

    /// Mark every active membrane older than the stale threshold as stale.
    pub async fn sweep(&self) -> RegistryResult<u64> {
        let marked = self
            .store
            .mark_stale(self.clock.now(), self.settings.stale_threshold)
            .await
            .map_err(storage)?;
        let counts = self.store.counts().await.map_err(storage)?;
        metrics::gauge!(names::ACTIVE_MEMBRANES).set(counts.active_membranes as f64);
        metrics::gauge!(names::STALE_MEMBRANES).set(counts.stale_membranes as f64);
        Ok(marked)
    }

    /// Hops from `from` to `to` through the namespace's active hierarchy.
    pub async fn route(
        &self,
        namespace_id: NamespaceId,
        from: &str,
        to: &str,
    ) -> RegistryResult<Vec<String>> {
        self.get_namespace(namespace_id).await?;
        let members = self
            .discover_membranes(DiscoverQuery {
                namespace_id: Some(namespace_id),
                ..DiscoverQuery::default()
            })
            .await?;
        for id in [from, to] {
            if !members.iter().any(|m| m.membrane_id == id) {
                return Err(RegistryError::NotFound(format!(
                    "membrane {id} in namespace {namespace_id}"
                )));
            }
        }
        let hierarchy = Hierarchy::from_edges(
            members
                .iter()
                .map(|m| (m.membrane_id.as_str(), m.parent_membrane.as_deref())),
        );
        Ok(hierarchy.route(from, to)?)
    }
}
