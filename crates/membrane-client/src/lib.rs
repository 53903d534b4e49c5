//! Client library for membrane processes.
//!
//! A membrane registers itself with the registry, keeps its record fresh with
//! periodic heartbeats, resolves peers through a TTL discovery cache, and sends
//! messages along hierarchy routes over the peer's advertised transport.
//!
//! ```no_run
//! use membrane_client::{ClientConfig, MembraneClient};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = MembraneClient::new(ClientConfig::from_env_or_yaml(None)?)?;
//! if !client.register().await {
//!     // Keep running without discovery.
//! }
//! client.send("peer", serde_json::json!({ "task": "ping" })).await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod transport;

pub use client::MembraneClient;
pub use config::ClientConfig;
pub use error::{SendError, TransportError};
pub use registry::{DiscoverFilter, MembraneRecord, RegistryClient};
pub use transport::{Endpoint, Envelope, Transport};
