// HTTP client for the registry API.
// Every call is bounded by the client-wide request timeout; callers decide
// whether a failure is worth more than a log line.
use anyhow::{Context, Result, anyhow};
use membrane_common::ids::{NamespaceId, RecordId};
use membrane_common::{CommunicationMode, MembraneStatus, Metadata};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A membrane as returned by discovery and lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MembraneRecord {
    pub namespace_id: NamespaceId,
    pub namespace_name: String,
    pub membrane_id: String,
    pub parent_membrane: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub status: MembraneStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Body of a registration request.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub namespace_id: NamespaceId,
    pub membrane_id: String,
    pub host: String,
    pub port: Option<u16>,
    pub parent_membrane: Option<String>,
    pub capabilities: Vec<String>,
    pub metadata: Metadata,
}

/// Narrows discovery; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<NamespaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_membrane: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_mode: Option<CommunicationMode>,
}

impl DiscoverFilter {
    pub fn namespace(namespace_id: NamespaceId) -> Self {
        Self {
            namespace_id: Some(namespace_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct NamespaceCreateRequest<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct NamespaceCreated {
    namespace_id: NamespaceId,
}

#[derive(Debug, Deserialize)]
struct MembraneRegistered {
    record_id: RecordId,
}

#[derive(Debug, Deserialize)]
struct MembraneListResponse {
    membranes: Vec<MembraneRecord>,
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base: Url,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build registry http client")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).with_context(|| format!("registry url {base_url}"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("registry url {base_url} cannot carry a path"));
        }
        Ok(Self {
            http,
            base,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Append path segments to the base url, percent-encoding each one so ids
    /// containing `/`, `?` or `#` stay a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("registry url {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn create_namespace(&self, name: &str, description: &str) -> Result<NamespaceId> {
        let url = self.url(&["namespaces"])?;
        let response = self
            .http
            .post(url)
            .json(&NamespaceCreateRequest { name, description })
            .send()
            .await
            .context("create namespace request")?
            .error_for_status()
            .context("create namespace status")?;
        let created: NamespaceCreated = response.json().await.context("create namespace body")?;
        Ok(created.namespace_id)
    }

    pub async fn register(&self, registration: &Registration) -> Result<RecordId> {
        let url = self.url(&["membranes", "register"])?;
        let response = self
            .http
            .post(url)
            .json(registration)
            .send()
            .await
            .context("register request")?
            .error_for_status()
            .context("register status")?;
        let registered: MembraneRegistered = response.json().await.context("register body")?;
        Ok(registered.record_id)
    }

    pub async fn heartbeat(&self, membrane_id: &str) -> Result<()> {
        let url = self.url(&["membranes", membrane_id, "heartbeat"])?;
        self.http
            .post(url)
            .send()
            .await
            .context("heartbeat request")?
            .error_for_status()
            .context("heartbeat status")?;
        Ok(())
    }

    /// Active membranes matching `filter`.
    pub async fn discover(&self, filter: &DiscoverFilter) -> Result<Vec<MembraneRecord>> {
        let url = self.url(&["membranes", "discover"])?;
        let response = self
            .http
            .get(url)
            .query(filter)
            .send()
            .await
            .context("discover request")?
            .error_for_status()
            .context("discover status")?;
        let list: MembraneListResponse = response.json().await.context("discover body")?;
        Ok(list.membranes)
    }

    /// Look up one membrane, stale or not. `None` when the registry has no such record.
    pub async fn get(
        &self,
        namespace_id: NamespaceId,
        membrane_id: &str,
    ) -> Result<Option<MembraneRecord>> {
        let namespace_id = namespace_id.to_string();
        let url = self.url(&["namespaces", &namespace_id, "membranes", membrane_id])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("get membrane request")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().context("get membrane status")?;
        Ok(Some(response.json().await.context("get membrane body")?))
    }

    pub async fn deregister(&self, namespace_id: NamespaceId, membrane_id: &str) -> Result<()> {
        let namespace_id = namespace_id.to_string();
        let url = self.url(&["namespaces", &namespace_id, "membranes", membrane_id])?;
        self.http
            .delete(url)
            .send()
            .await
            .context("deregister request")?
            .error_for_status()
            .context("deregister status")?;
        Ok(())
    }

    pub async fn reactivate(&self, namespace_id: NamespaceId, membrane_id: &str) -> Result<()> {
        let namespace_id = namespace_id.to_string();
        let url = self.url(&[
            "namespaces",
            &namespace_id,
            "membranes",
            membrane_id,
            "reactivate",
        ])?;
        self.http
            .post(url)
            .send()
            .await
            .context("reactivate request")?
            .error_for_status()
            .context("reactivate status")?;
        Ok(())
    }
}
