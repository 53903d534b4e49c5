//! In-memory implementation of the registry store.
//!
//! # Purpose
//! Backs local development, tests, and single-process deployments where losing
//! registrations on restart is acceptable. Namespaces and membranes live in
//! `HashMap`s guarded by `tokio::sync::RwLock`.
//!
//! # Consistency
//! - Not durable.
//! - Mutations take write locks, reads take read locks, so every record change
//!   is atomic with respect to readers.
//! - When both maps are needed the namespaces lock is always taken first.
//!
//! # Performance characteristics
//! Uniqueness checks and filters scan the maps. That is fine for the handful of
//! membranes a dev registry holds but would not scale to very large fleets.
use super::{RegistryStore, StoreError, StoreResult, stale_cutoff};
use crate::model::{
    HeartbeatUpdate, Membrane, MembraneFilter, MembraneView, Namespace, RegistryCounts,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use membrane_common::ids::{NamespaceId, RecordId};
use membrane_common::{MembraneStatus, Metadata};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    namespaces: Arc<RwLock<HashMap<NamespaceId, Namespace>>>,
    membranes: Arc<RwLock<HashMap<RecordId, Membrane>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_membrane<'a>(
    membranes: &'a HashMap<RecordId, Membrane>,
    namespace_id: NamespaceId,
    membrane_id: &str,
) -> Option<&'a Membrane> {
    membranes
        .values()
        .find(|m| m.namespace_id == namespace_id && m.membrane_id == membrane_id)
}

fn find_record_id(
    membranes: &HashMap<RecordId, Membrane>,
    namespace_id: NamespaceId,
    membrane_id: &str,
) -> Option<RecordId> {
    find_membrane(membranes, namespace_id, membrane_id).map(|m| m.id)
}

fn join_view(namespaces: &HashMap<NamespaceId, Namespace>, membrane: &Membrane) -> MembraneView {
    let name = namespaces
        .get(&membrane.namespace_id)
        .map(|ns| ns.name.clone())
        .unwrap_or_default();
    membrane.clone().into_view(name)
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn insert_namespace(&self, namespace: Namespace) -> StoreResult<Namespace> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.values().any(|ns| ns.name == namespace.name) {
            return Err(StoreError::Conflict(format!(
                "namespace name {} exists",
                namespace.name
            )));
        }
        if namespaces.contains_key(&namespace.id) {
            return Err(StoreError::Conflict(format!("namespace id {} exists", namespace.id)));
        }
        namespaces.insert(namespace.id, namespace.clone());
        Ok(namespace)
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let namespaces = self.namespaces.read().await;
        let mut items: Vec<Namespace> = namespaces.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn get_namespace(&self, id: NamespaceId) -> StoreResult<Namespace> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("namespace".into()))
    }

    async fn update_namespace_metadata(
        &self,
        id: NamespaceId,
        metadata: Metadata,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Namespace> {
        let mut namespaces = self.namespaces.write().await;
        let namespace = namespaces
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("namespace".into()))?;
        namespace.metadata = metadata;
        namespace.updated_at = updated_at;
        Ok(namespace.clone())
    }

    async fn insert_membrane(&self, membrane: Membrane) -> StoreResult<Membrane> {
        let namespaces = self.namespaces.read().await;
        if !namespaces.contains_key(&membrane.namespace_id) {
            return Err(StoreError::NotFound("namespace".into()));
        }
        let mut membranes = self.membranes.write().await;
        if find_membrane(&membranes, membrane.namespace_id, &membrane.membrane_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "membrane {} exists in namespace {}",
                membrane.membrane_id, membrane.namespace_id
            )));
        }
        membranes.insert(membrane.id, membrane.clone());
        Ok(membrane)
    }

    async fn query_membranes(&self, filter: &MembraneFilter) -> StoreResult<Vec<MembraneView>> {
        let namespaces = self.namespaces.read().await;
        let membranes = self.membranes.read().await;
        let mut items: Vec<MembraneView> = membranes
            .values()
            .filter(|m| filter.matches(m))
            .map(|m| join_view(&namespaces, m))
            .collect();
        items.sort_by(|a, b| {
            a.namespace_name
                .cmp(&b.namespace_name)
                .then_with(|| a.membrane_id.cmp(&b.membrane_id))
        });
        Ok(items)
    }

    async fn get_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> StoreResult<MembraneView> {
        let namespaces = self.namespaces.read().await;
        let membranes = self.membranes.read().await;
        find_membrane(&membranes, namespace_id, membrane_id)
            .map(|m| join_view(&namespaces, m))
            .ok_or_else(|| StoreError::NotFound("membrane".into()))
    }

    async fn update_membrane_heartbeat(
        &self,
        membrane_id: &str,
        at: DateTime<Utc>,
        reactivate: bool,
    ) -> StoreResult<HeartbeatUpdate> {
        let mut membranes = self.membranes.write().await;
        let mut touched = HashSet::new();
        let mut records = 0u64;
        for membrane in membranes
            .values_mut()
            .filter(|m| m.membrane_id == membrane_id)
        {
            membrane.last_heartbeat = membrane.last_heartbeat.max(at);
            if reactivate {
                membrane.status = MembraneStatus::Active;
            }
            touched.insert(membrane.namespace_id);
            records += 1;
        }
        Ok(HeartbeatUpdate {
            records,
            namespaces: touched.len() as u64,
        })
    }

    async fn reactivate_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut membranes = self.membranes.write().await;
        let record_id = find_record_id(&membranes, namespace_id, membrane_id)
            .ok_or_else(|| StoreError::NotFound("membrane".into()))?;
        if let Some(membrane) = membranes.get_mut(&record_id) {
            membrane.status = MembraneStatus::Active;
            membrane.last_heartbeat = membrane.last_heartbeat.max(at);
        }
        Ok(())
    }

    async fn delete_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> StoreResult<()> {
        let mut membranes = self.membranes.write().await;
        let record_id = find_record_id(&membranes, namespace_id, membrane_id)
            .ok_or_else(|| StoreError::NotFound("membrane".into()))?;
        membranes.remove(&record_id);
        Ok(())
    }

    async fn mark_stale(&self, now: DateTime<Utc>, older_than: Duration) -> StoreResult<u64> {
        let cutoff = stale_cutoff(now, older_than)?;
        let mut membranes = self.membranes.write().await;
        let mut marked = 0u64;
        for membrane in membranes.values_mut() {
            if membrane.status == MembraneStatus::Active && membrane.last_heartbeat < cutoff {
                membrane.status = MembraneStatus::Stale;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn counts(&self) -> StoreResult<RegistryCounts> {
        let namespaces = self.namespaces.read().await;
        let membranes = self.membranes.read().await;
        let mut counts = RegistryCounts {
            namespaces: namespaces.len() as u64,
            ..RegistryCounts::default()
        };
        for membrane in membranes.values() {
            match membrane.status {
                MembraneStatus::Active => counts.active_membranes += 1,
                MembraneStatus::Stale => counts.stale_membranes += 1,
            }
        }
        Ok(counts)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
