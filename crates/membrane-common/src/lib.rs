// Shared identifiers and small enums used on both sides of the registry wire.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub type Result<T> = std::result::Result<T, Error>;

/// Open key/value metadata attached to namespaces and membranes.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Metadata key a membrane uses to advertise how peers should reach it.
pub const COMMUNICATION_MODE_KEY: &str = "communication_mode";
/// Metadata key carrying an explicit address (inbox dir, URL, socket path).
pub const ENDPOINT_KEY: &str = "endpoint";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("unsupported communication mode: {0}")]
    InvalidMode(String),
}

pub mod ids {
    // Strongly typed IDs so namespace and record ids cannot be swapped.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    macro_rules! id_type {
        ($name:ident) => {
            #[derive(
                Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
            )]
            pub struct $name(Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                // Wrap an existing UUID when decoding from storage.
                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                pub fn as_uuid(&self) -> Uuid {
                    self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(input: &str) -> Result<Self> {
                    let uuid =
                        Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
                    Ok(Self(uuid))
                }
            }
        };
    }

    id_type!(NamespaceId);
    id_type!(RecordId);
}

/// Liveness state of a membrane record.
///
/// Records start `Active`; only the sweep moves them to `Stale`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembraneStatus {
    Active,
    Stale,
}

impl MembraneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembraneStatus::Active => "active",
            MembraneStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for MembraneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembraneStatus {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "active" => Ok(MembraneStatus::Active),
            "stale" => Ok(MembraneStatus::Stale),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// How a membrane accepts messages from its peers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommunicationMode {
    SharedVolume,
    #[default]
    Network,
    Ipc,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::SharedVolume => "shared-volume",
            CommunicationMode::Network => "network",
            CommunicationMode::Ipc => "ipc",
        }
    }

    /// Read the advertised mode from membrane metadata, defaulting to `Network`.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        match metadata.get(COMMUNICATION_MODE_KEY) {
            None | Some(serde_json::Value::Null) => Ok(CommunicationMode::default()),
            Some(serde_json::Value::String(value)) => value.parse(),
            Some(other) => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommunicationMode {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "shared-volume" => Ok(CommunicationMode::SharedVolume),
            "network" => Ok(CommunicationMode::Network),
            "ipc" => Ok(CommunicationMode::Ipc),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}
