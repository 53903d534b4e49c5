// Membrane-side registry integration.
// Registry trouble is never fatal here: failures are logged and the membrane
// keeps running, retrying on the next heartbeat or refresh tick.
use crate::cache::{DiscoveryCache, Peer};
use crate::config::ClientConfig;
use crate::error::{SendError, TransportError};
use crate::registry::{DiscoverFilter, MembraneRecord, Registration, RegistryClient};
use crate::transport::{Endpoint, Envelope, ModeTransport, Transport};
use anyhow::Context;
use chrono::Utc;
use membrane_common::ids::NamespaceId;
use membrane_common::{COMMUNICATION_MODE_KEY, CommunicationMode, ENDPOINT_KEY, Metadata};
use membrane_router::Hierarchy;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Registry client bound to one membrane.
///
/// Background tasks (heartbeat, discovery refresh) start after a successful
/// [`register`](Self::register) and stop on [`shutdown`](Self::shutdown),
/// [`deregister`](Self::deregister), or when the client is dropped.
pub struct MembraneClient {
    config: ClientConfig,
    registry: Option<RegistryClient>,
    cache: Arc<DiscoveryCache>,
    transport: Arc<dyn Transport>,
    registered: AtomicBool,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl MembraneClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let transport =
            ModeTransport::new(config.send_timeout).context("build message transport")?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let registry = match (&config.registry_url, config.namespace_id) {
            (Some(url), Some(_)) => Some(RegistryClient::new(url, config.request_timeout)?),
            _ => None,
        };
        Ok(Self {
            cache: Arc::new(DiscoveryCache::new(config.discovery_ttl)),
            config,
            registry,
            transport,
            registered: AtomicBool::new(false),
            tasks: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn registry(&self) -> Option<(&RegistryClient, NamespaceId)> {
        Some((self.registry.as_ref()?, self.config.namespace_id?))
    }

    fn registration(&self, namespace_id: NamespaceId) -> Registration {
        let mut metadata = Metadata::new();
        metadata.insert(
            COMMUNICATION_MODE_KEY.to_string(),
            self.config.communication_mode.as_str().into(),
        );
        if let Some(endpoint) = &self.config.endpoint {
            metadata.insert(ENDPOINT_KEY.to_string(), endpoint.clone().into());
        }
        Registration {
            namespace_id,
            membrane_id: self.config.membrane_id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            parent_membrane: self.config.parent_membrane.clone(),
            capabilities: self.config.capabilities.clone(),
            metadata,
        }
    }

    /// Register this membrane and start the background tasks.
    ///
    /// Returns `false` when the registry is disabled or the call fails; the
    /// membrane then runs in degraded mode without registry features.
    pub async fn register(&self) -> bool {
        let Some((registry, namespace_id)) = self.registry() else {
            tracing::warn!(
                membrane_id = %self.config.membrane_id,
                "registry not configured; running without discovery"
            );
            return false;
        };
        match registry.register(&self.registration(namespace_id)).await {
            Ok(record_id) => {
                tracing::info!(
                    membrane_id = %self.config.membrane_id,
                    %namespace_id,
                    %record_id,
                    "registered with registry"
                );
                self.registered.store(true, Ordering::SeqCst);
                self.start_background().await;
                true
            }
            Err(err) => {
                tracing::warn!(
                    membrane_id = %self.config.membrane_id,
                    error = %format!("{err:#}"),
                    "registration failed; continuing in degraded mode"
                );
                false
            }
        }
    }

    /// Send one heartbeat now. Failures are logged and reported as `false`.
    pub async fn heartbeat(&self) -> bool {
        let Some((registry, _)) = self.registry() else {
            return false;
        };
        send_heartbeat(registry, &self.config.membrane_id).await
    }

    /// Resolve a peer to an endpoint, using the cache while it is fresh.
    ///
    /// Never fails: unknown peers, disabled registries and failed lookups all
    /// yield `None`.
    pub async fn discover(&self, target: &str) -> Option<Endpoint> {
        if let Some(peer) = self.cache.get(target).await {
            return Some(peer.endpoint);
        }
        let (registry, namespace_id) = self.registry()?;
        if let Err(err) = refresh_cache(registry, &self.cache, namespace_id).await {
            tracing::warn!(
                target_id = %target,
                error = %format!("{err:#}"),
                "discovery failed"
            );
            return None;
        }
        let found = self.cache.get(target).await.map(|peer| peer.endpoint);
        if found.is_none() {
            tracing::debug!(target_id = %target, "peer not found in registry");
        }
        found
    }

    /// Re-read the namespace listing into the cache. Returns the number of peers cached.
    pub async fn refresh(&self) -> Option<usize> {
        let (registry, namespace_id) = self.registry()?;
        match refresh_cache(registry, &self.cache, namespace_id).await {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "discovery refresh failed");
                None
            }
        }
    }

    /// Active membranes in this namespace, optionally only the children of
    /// `parent` and only those advertising `mode`. Bypasses the cache.
    pub async fn list_peers(
        &self,
        parent: Option<&str>,
        mode: Option<CommunicationMode>,
    ) -> Option<Vec<MembraneRecord>> {
        let (registry, namespace_id) = self.registry()?;
        let filter = DiscoverFilter {
            parent_membrane: parent.map(str::to_string),
            communication_mode: mode,
            ..DiscoverFilter::namespace(namespace_id)
        };
        match registry.discover(&filter).await {
            Ok(records) => Some(records),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "peer listing failed");
                None
            }
        }
    }

    /// Deliver `payload` to `target` along its hierarchy route.
    ///
    /// Blocks until the transport acknowledges or the send timeout elapses.
    pub async fn send(&self, target: &str, payload: serde_json::Value) -> Result<(), SendError> {
        let endpoint = self
            .discover(target)
            .await
            .ok_or_else(|| SendError::TargetUnavailable(target.to_string()))?;
        let route = self
            .hierarchy()
            .await
            .route(&self.config.membrane_id, target)?;
        let envelope = Envelope {
            sender: self.config.membrane_id.clone(),
            target: target.to_string(),
            route,
            timestamp: Utc::now(),
            payload,
        };
        let timeout = self.config.send_timeout;
        let outcome =
            match tokio::time::timeout(timeout, self.transport.deliver(&endpoint, &envelope)).await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(TransportError::Timeout)) | Err(_) => Err(SendError::Timeout(timeout)),
                Ok(Err(err)) => Err(SendError::Transport(err)),
            };
        if let Err(err) = &outcome {
            // The peer may have moved; look it up again next time.
            self.cache.invalidate(target).await;
            tracing::warn!(target_id = %target, mode = %endpoint.mode, error = %err, "send failed");
        }
        outcome
    }

    /// Cached peers plus this membrane, as a routing snapshot.
    async fn hierarchy(&self) -> Hierarchy {
        let mut hierarchy = Hierarchy::from_edges(
            self.cache
                .peers()
                .await
                .into_iter()
                .map(|peer| (peer.membrane_id, peer.parent_membrane)),
        );
        hierarchy.insert(
            self.config.membrane_id.clone(),
            self.config.parent_membrane.as_deref(),
        );
        hierarchy
    }

    /// Stop the heartbeat, then remove this membrane from the registry.
    pub async fn deregister(&self) -> bool {
        self.stop_background().await;
        let Some((registry, namespace_id)) = self.registry() else {
            return false;
        };
        match registry
            .deregister(namespace_id, &self.config.membrane_id)
            .await
        {
            Ok(()) => {
                self.registered.store(false, Ordering::SeqCst);
                tracing::info!(membrane_id = %self.config.membrane_id, "deregistered");
                true
            }
            Err(err) => {
                tracing::warn!(
                    membrane_id = %self.config.membrane_id,
                    error = %format!("{err:#}"),
                    "deregistration failed"
                );
                false
            }
        }
    }

    /// Ask the registry to flip this membrane back to active after it went stale.
    pub async fn reactivate(&self) -> bool {
        let Some((registry, namespace_id)) = self.registry() else {
            return false;
        };
        match registry
            .reactivate(namespace_id, &self.config.membrane_id)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    membrane_id = %self.config.membrane_id,
                    error = %format!("{err:#}"),
                    "reactivation failed"
                );
                false
            }
        }
    }

    /// Look up this membrane's own registry record.
    pub async fn lookup_self(&self) -> Option<MembraneRecord> {
        let (registry, namespace_id) = self.registry()?;
        match registry.get(namespace_id, &self.config.membrane_id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "self lookup failed");
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        self.stop_background().await;
    }

    async fn start_background(&self) {
        let Some((registry, namespace_id)) = self.registry() else {
            return;
        };
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let heartbeat_registry = registry.clone();
        let membrane_id = self.config.membrane_id.clone();
        let heartbeat = spawn_periodic(
            self.config.heartbeat_interval,
            shutdown_rx.clone(),
            move || {
                let registry = heartbeat_registry.clone();
                let membrane_id = membrane_id.clone();
                async move {
                    send_heartbeat(&registry, &membrane_id).await;
                }
            },
        );

        let refresh_registry = registry.clone();
        let cache = self.cache.clone();
        let refresh = spawn_periodic(self.config.discovery_ttl, shutdown_rx, move || {
            let registry = refresh_registry.clone();
            let cache = cache.clone();
            async move {
                if let Err(err) = refresh_cache(&registry, &cache, namespace_id).await {
                    tracing::warn!(error = %format!("{err:#}"), "discovery refresh failed");
                }
            }
        });

        *tasks = Some(BackgroundTasks {
            shutdown: shutdown_tx,
            handles: vec![heartbeat, refresh],
        });
    }

    async fn stop_background(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        let _ = tasks.shutdown.send(true);
        for handle in tasks.handles {
            let _ = handle.await;
        }
        tracing::debug!(membrane_id = %self.config.membrane_id, "background tasks stopped");
    }
}

/// Run `tick` every `interval` until `shutdown` flips or its sender drops.
///
/// The first run happens one interval after start. Overrunning ticks are skipped.
fn spawn_periodic<F, Fut>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            tick().await;
        }
    })
}

async fn send_heartbeat(registry: &RegistryClient, membrane_id: &str) -> bool {
    match registry.heartbeat(membrane_id).await {
        Ok(()) => {
            tracing::trace!(%membrane_id, "heartbeat sent");
            true
        }
        Err(err) => {
            tracing::warn!(%membrane_id, error = %format!("{err:#}"), "heartbeat failed");
            false
        }
    }
}

async fn refresh_cache(
    registry: &RegistryClient,
    cache: &DiscoveryCache,
    namespace_id: NamespaceId,
) -> anyhow::Result<usize> {
    let records = registry.discover(&DiscoverFilter::namespace(namespace_id)).await?;
    let peers: Vec<Peer> = records.iter().filter_map(peer_from_record).collect();
    let count = peers.len();
    cache.replace_all(peers).await;
    Ok(count)
}

fn peer_from_record(record: &MembraneRecord) -> Option<Peer> {
    match Endpoint::from_record(record) {
        Ok(endpoint) => Some(Peer {
            membrane_id: record.membrane_id.clone(),
            parent_membrane: record.parent_membrane.clone(),
            namespace_name: record.namespace_name.clone(),
            endpoint,
        }),
        Err(err) => {
            tracing::warn!(
                membrane_id = %record.membrane_id,
                error = %err,
                "skipping peer with unusable endpoint"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NeverAcks;

    #[async_trait]
    impl Transport for NeverAcks {
        async fn deliver(&self, _: &Endpoint, _: &Envelope) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    fn offline_config() -> ClientConfig {
        ClientConfig {
            membrane_id: "self".to_string(),
            ..ClientConfig::default()
        }
    }

    fn peer(id: &str, parent: Option<&str>) -> Peer {
        Peer {
            membrane_id: id.to_string(),
            parent_membrane: parent.map(str::to_string),
            namespace_name: "ns".to_string(),
            endpoint: Endpoint {
                membrane_id: id.to_string(),
                mode: CommunicationMode::Network,
                address: format!("http://{id}"),
            },
        }
    }

    #[tokio::test]
    async fn disabled_registry_degrades_quietly() {
        let client = MembraneClient::new(offline_config()).expect("client");
        assert!(!client.register().await);
        assert!(!client.is_registered());
        assert!(!client.heartbeat().await);
        assert!(client.discover("anyone").await.is_none());
        assert!(client.refresh().await.is_none());
        assert!(client.list_peers(None, None).await.is_none());
        assert!(!client.deregister().await);
        assert!(matches!(
            client.send("anyone", serde_json::json!({})).await,
            Err(SendError::TargetUnavailable(id)) if id == "anyone"
        ));
    }

    #[tokio::test]
    async fn cached_peers_resolve_without_registry() {
        let client = MembraneClient::new(offline_config()).expect("client");
        client.cache.put(peer("other", None)).await;
        let endpoint = client.discover("other").await.expect("cached");
        assert_eq!(endpoint.address, "http://other");
    }

    #[tokio::test]
    async fn hierarchy_includes_self() {
        let config = ClientConfig {
            parent_membrane: Some("root".to_string()),
            ..offline_config()
        };
        let client = MembraneClient::new(config).expect("client");
        client.cache.put(peer("root", None)).await;
        client.cache.put(peer("sibling", Some("root"))).await;
        let path = client
            .hierarchy()
            .await
            .route("self", "sibling")
            .expect("route");
        assert_eq!(path, vec!["self", "root", "sibling"]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_times_out_and_invalidates_cache() {
        let config = ClientConfig {
            send_timeout: Duration::from_millis(100),
            ..offline_config()
        };
        let client = MembraneClient::with_transport(config, Arc::new(NeverAcks)).expect("client");
        client.cache.put(peer("other", None)).await;
        let err = client
            .send("other", serde_json::json!({ "n": 1 }))
            .await
            .expect_err("timeout");
        assert!(matches!(err, SendError::Timeout(d) if d == Duration::from_millis(100)));
        assert!(client.cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn send_reports_route_cycles() {
        let config = ClientConfig {
            parent_membrane: Some("loop-a".to_string()),
            ..offline_config()
        };
        let client = MembraneClient::new(config).expect("client");
        client.cache.put(peer("loop-a", Some("loop-b"))).await;
        client.cache.put(peer("loop-b", Some("loop-a"))).await;
        client.cache.put(peer("other", None)).await;
        let err = client
            .send("other", serde_json::json!({}))
            .await
            .expect_err("cycle");
        assert!(matches!(err, SendError::Route(_)));
    }
}
