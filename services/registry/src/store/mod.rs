//! Storage layer for namespaces and membranes.
//!
//! # Purpose
//! `RegistryStore` is the narrow contract the registry core talks to. The core
//! holds no state between calls, so every backend must be safe to share between
//! several registry processes pointed at the same storage.
//!
//! # Key invariants
//! - Namespace names are unique.
//! - `(namespace_id, membrane_id)` is unique; inserts never upsert.
//! - Every write is atomic per record.
//! - Heartbeats only move `last_heartbeat` forward.
use crate::model::{
    HeartbeatUpdate, Membrane, MembraneFilter, MembraneView, Namespace, RegistryCounts,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use membrane_common::Metadata;
use membrane_common::ids::NamespaceId;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn insert_namespace(&self, namespace: Namespace) -> StoreResult<Namespace>;
    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>>;
    async fn get_namespace(&self, id: NamespaceId) -> StoreResult<Namespace>;
    async fn update_namespace_metadata(
        &self,
        id: NamespaceId,
        metadata: Metadata,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Namespace>;

    /// Fails with `NotFound` when the owning namespace is missing and with
    /// `Conflict` when the `(namespace_id, membrane_id)` pair is taken.
    async fn insert_membrane(&self, membrane: Membrane) -> StoreResult<Membrane>;
    async fn query_membranes(&self, filter: &MembraneFilter) -> StoreResult<Vec<MembraneView>>;
    async fn get_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> StoreResult<MembraneView>;

    /// Bump `last_heartbeat` on every record carrying `membrane_id`, in any
    /// namespace. Unknown ids touch nothing and still succeed.
    async fn update_membrane_heartbeat(
        &self,
        membrane_id: &str,
        at: DateTime<Utc>,
        reactivate: bool,
    ) -> StoreResult<HeartbeatUpdate>;

    /// Set one record back to `active` with a fresh heartbeat.
    async fn reactivate_membrane(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn delete_membrane(&self, namespace_id: NamespaceId, membrane_id: &str)
    -> StoreResult<()>;

    /// Move every active record whose heartbeat is older than `now - older_than`
    /// to `stale`, returning how many changed.
    async fn mark_stale(&self, now: DateTime<Utc>, older_than: Duration) -> StoreResult<u64>;

    async fn counts(&self) -> StoreResult<RegistryCounts>;
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

pub(crate) fn stale_cutoff(now: DateTime<Utc>, older_than: Duration) -> StoreResult<DateTime<Utc>> {
    let window = chrono::TimeDelta::from_std(older_than)
        .map_err(|err| StoreError::Unexpected(anyhow::anyhow!("stale threshold: {err}")))?;
    now.checked_sub_signed(window)
        .ok_or_else(|| StoreError::Unexpected(anyhow::anyhow!("stale threshold out of range")))
}
