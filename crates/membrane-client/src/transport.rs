//! Message delivery to a resolved peer.
//!
//! A peer advertises one [`CommunicationMode`] and an address in its registry
//! metadata. [`ModeTransport`] dispatches an [`Envelope`] to the matching
//! transport:
//!
//! * shared volume: one JSON file per message in the peer's inbox directory
//! * network: `POST {address}/message`, any 2xx is an ack
//! * ipc: one JSON line over a Unix socket, answered by an `ok` line
use crate::error::TransportError;
use crate::registry::MembraneRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use membrane_common::{CommunicationMode, ENDPOINT_KEY};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const SHARED_VOLUME_INBOX_ROOT: &str = "/opt/membrane/communication/inbox";
pub const IPC_SOCKET_DIR: &str = "/tmp";

/// Where and how to reach one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub membrane_id: String,
    pub mode: CommunicationMode,
    pub address: String,
}

impl Endpoint {
    /// Resolve a registry record into an endpoint.
    ///
    /// An explicit `endpoint` metadata string wins; otherwise the address is
    /// derived from the mode.
    pub fn from_record(record: &MembraneRecord) -> membrane_common::Result<Self> {
        let mode = CommunicationMode::from_metadata(&record.metadata)?;
        let explicit = record
            .metadata
            .get(ENDPOINT_KEY)
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let address = explicit.unwrap_or_else(|| {
            default_address(mode, &record.membrane_id, &record.host, record.port)
        });
        Ok(Self {
            membrane_id: record.membrane_id.clone(),
            mode,
            address,
        })
    }
}

pub fn default_address(
    mode: CommunicationMode,
    membrane_id: &str,
    host: &str,
    port: Option<u16>,
) -> String {
    match mode {
        CommunicationMode::SharedVolume => format!("{SHARED_VOLUME_INBOX_ROOT}/{membrane_id}"),
        CommunicationMode::Network => match port {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        },
        CommunicationMode::Ipc => format!("{IPC_SOCKET_DIR}/membrane_{membrane_id}.sock"),
    }
}

/// What travels between membranes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub target: String,
    pub route: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `envelope` to the peer at `endpoint`. `Ok` means the peer acknowledged it.
    async fn deliver(&self, endpoint: &Endpoint, envelope: &Envelope)
    -> Result<(), TransportError>;
}

// Disambiguates messages from one sender stamped in the same millisecond.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct SharedVolumeTransport;

impl SharedVolumeTransport {
    fn file_name(envelope: &Envelope, seq: u64) -> String {
        format!(
            "msg_{}_{}_{seq}.json",
            file_safe(&envelope.sender),
            envelope.timestamp.timestamp_millis()
        )
    }
}

/// Membrane ids are free-form; keep them from escaping the inbox directory.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Transport for SharedVolumeTransport {
    async fn deliver(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        let inbox = Path::new(&endpoint.address);
        tokio::fs::create_dir_all(inbox).await?;
        let bytes = serde_json::to_vec_pretty(envelope)?;
        // Readers only ever see complete files: write aside, then link in.
        let staging: PathBuf = inbox.join(format!(
            ".msg_{}_{}.tmp",
            std::process::id(),
            NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&staging, &bytes).await?;
        // Linking never replaces an existing message, unlike rename.
        let linked = loop {
            let name = Self::file_name(envelope, NEXT_SEQ.fetch_add(1, Ordering::Relaxed));
            match tokio::fs::hard_link(&staging, inbox.join(&name)).await {
                Ok(()) => break Ok(name),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => break Err(err),
            }
        };
        if let Err(err) = tokio::fs::remove_file(&staging).await {
            tracing::warn!(file = %staging.display(), error = %err, "staging file left behind");
        }
        let name = linked?;
        tracing::debug!(peer = %envelope.target, file = %name, "message written to inbox");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NetworkTransport {
    http: reqwest::Client,
}

impl NetworkTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn deliver(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        let url = format!("{}/message", endpoint.address.trim_end_matches('/'));
        let response = self.http.post(url).json(envelope).send().await;
        match response {
            Ok(response) => {
                response.error_for_status()?;
                Ok(())
            }
            Err(err) if err.is_timeout() => Err(TransportError::Timeout),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IpcTransport;

#[cfg(unix)]
#[async_trait]
impl Transport for IpcTransport {
    async fn deliver(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        let stream = tokio::net::UnixStream::connect(&endpoint.address).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&line).await?;
        write_half.flush().await?;

        let mut ack = String::new();
        let read = BufReader::new(read_half).read_line(&mut ack).await?;
        if read == 0 {
            return Err(TransportError::Rejected("connection closed before ack".into()));
        }
        match ack.trim() {
            "ok" => Ok(()),
            other => Err(TransportError::Rejected(other.to_string())),
        }
    }
}

#[cfg(not(unix))]
#[async_trait]
impl Transport for IpcTransport {
    async fn deliver(
        &self,
        _endpoint: &Endpoint,
        _envelope: &Envelope,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            CommunicationMode::Ipc.to_string(),
        ))
    }
}

/// Picks the transport matching the endpoint's advertised mode.
#[derive(Debug, Clone)]
pub struct ModeTransport {
    shared_volume: SharedVolumeTransport,
    network: NetworkTransport,
    ipc: IpcTransport,
}

impl ModeTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            shared_volume: SharedVolumeTransport,
            network: NetworkTransport::new(request_timeout)?,
            ipc: IpcTransport,
        })
    }
}

#[async_trait]
impl Transport for ModeTransport {
    async fn deliver(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        match endpoint.mode {
            CommunicationMode::SharedVolume => {
                self.shared_volume.deliver(endpoint, envelope).await
            }
            CommunicationMode::Network => self.network.deliver(endpoint, envelope).await,
            CommunicationMode::Ipc => self.ipc.deliver(endpoint, envelope).await,
        }
    }
}
