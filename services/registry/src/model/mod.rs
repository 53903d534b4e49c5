//! Registry domain records.
//!
//! These are the rows the storage layer owns. API request/response shapes live
//! in `api::types` and are converted at the handler boundary.
mod membrane;
mod namespace;

pub use membrane::{Membrane, MembraneFilter, MembraneView};
pub use namespace::Namespace;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Aggregate counts reported by `Stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegistryCounts {
    pub namespaces: u64,
    pub active_membranes: u64,
    pub stale_membranes: u64,
}

/// Outcome of a heartbeat write.
///
/// Heartbeats match on the logical membrane id alone, so one call may touch
/// records in several namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    pub records: u64,
    pub namespaces: u64,
}
