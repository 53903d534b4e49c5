// TTL cache of discovered peers, keyed by logical membrane id.
use crate::transport::Endpoint;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One discovered peer: where to reach it and where it sits in the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub membrane_id: String,
    pub parent_membrane: Option<String>,
    pub namespace_name: String,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    peer: Peer,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct DiscoveryCache {
    // RwLock allows concurrent readers while refreshes take exclusive access.
    inner: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, membrane_id: &str) -> Option<Peer> {
        // Write lock so expired entries can be evicted on read.
        let mut guard = self.inner.write().await;
        let entry = guard.get(membrane_id)?;
        if Instant::now() >= entry.expires_at {
            guard.remove(membrane_id);
            return None;
        }
        Some(entry.peer.clone())
    }

    pub async fn put(&self, peer: Peer) {
        let expires_at = Instant::now() + self.ttl;
        self.inner
            .write()
            .await
            .insert(peer.membrane_id.clone(), CacheEntry { peer, expires_at });
    }

    /// Swap the whole cache for a fresh discovery listing.
    ///
    /// Peers missing from the listing are dropped: they went stale or were
    /// deregistered.
    pub async fn replace_all(&self, peers: impl IntoIterator<Item = Peer>) {
        let expires_at = Instant::now() + self.ttl;
        let fresh: HashMap<String, CacheEntry> = peers
            .into_iter()
            .map(|peer| (peer.membrane_id.clone(), CacheEntry { peer, expires_at }))
            .collect();
        *self.inner.write().await = fresh;
    }

    pub async fn invalidate(&self, membrane_id: &str) -> Option<Peer> {
        self.inner
            .write()
            .await
            .remove(membrane_id)
            .map(|entry| entry.peer)
    }

    /// Unexpired peers, in no particular order.
    pub async fn peers(&self) -> Vec<Peer> {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.peer.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membrane_common::CommunicationMode;

    fn peer(id: &str) -> Peer {
        Peer {
            membrane_id: id.to_string(),
            parent_membrane: None,
            namespace_name: "ns".to_string(),
            endpoint: Endpoint {
                membrane_id: id.to_string(),
                mode: CommunicationMode::Network,
                address: format!("http://{id}:8080"),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = DiscoveryCache::new(Duration::from_secs(30));
        cache.put(peer("a")).await;
        assert!(cache.get("a").await.is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.peers().await.is_empty());
        assert!(cache.get("a").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn replace_all_drops_missing_peers() {
        let cache = DiscoveryCache::new(Duration::from_secs(30));
        cache.put(peer("a")).await;
        cache.put(peer("b")).await;
        cache.replace_all(vec![peer("b"), peer("c")]).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn invalidate_returns_the_removed_peer() {
        let cache = DiscoveryCache::new(Duration::from_secs(30));
        cache.put(peer("a")).await;
        assert_eq!(cache.invalidate("a").await, Some(peer("a")));
        assert_eq!(cache.invalidate("a").await, None);
    }
}
