// Client against a live in-process registry on an ephemeral port.
use chrono::TimeDelta;
use membrane_client::registry::RegistryClient;
use membrane_client::{ClientConfig, Envelope, MembraneClient, SendError};
use membrane_common::CommunicationMode;
use membrane_common::ids::NamespaceId;
use membrane_registry::app::{AppState, build_router};
use membrane_registry::registry::clock::ManualClock;
use membrane_registry::registry::sweep::run_sweep_cycle;
use membrane_registry::registry::{Registry, RegistrySettings};
use membrane_registry::store::memory::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

struct TestRegistry {
    url: String,
    registry: Registry,
    clock: Arc<ManualClock>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_registry() -> TestRegistry {
    let clock = Arc::new(ManualClock::default());
    let registry = Registry::new(
        Arc::new(InMemoryStore::new()),
        clock.clone(),
        RegistrySettings::default(),
    );
    let app = build_router(AppState {
        registry: registry.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind registry");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    TestRegistry {
        url: format!("http://{addr}"),
        registry,
        clock,
        server,
    }
}

async fn namespace(registry: &TestRegistry, name: &str) -> NamespaceId {
    RegistryClient::new(&registry.url, Duration::from_secs(2))
        .expect("registry client")
        .create_namespace(name, "integration")
        .await
        .expect("create namespace")
}

fn config(
    registry: &TestRegistry,
    namespace_id: NamespaceId,
    membrane_id: &str,
    parent: Option<&str>,
) -> ClientConfig {
    ClientConfig {
        registry_url: Some(registry.url.clone()),
        namespace_id: Some(namespace_id),
        membrane_id: membrane_id.to_string(),
        parent_membrane: parent.map(str::to_string),
        port: Some(8080),
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn register_discover_and_heartbeat() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "cognitive-system").await;

    let root = MembraneClient::new(config(&registry, ns, "root", None)).expect("root");
    let child = MembraneClient::new(config(&registry, ns, "child", Some("root"))).expect("child");
    assert!(root.register().await);
    assert!(child.register().await);
    assert!(child.is_registered());

    let endpoint = child.discover("root").await.expect("root endpoint");
    assert_eq!(endpoint.mode, CommunicationMode::Network);
    assert_eq!(endpoint.address, "http://localhost:8080");
    assert!(child.discover("nobody").await.is_none());

    assert!(child.heartbeat().await);
    let record = child.lookup_self().await.expect("self record");
    assert_eq!(record.parent_membrane.as_deref(), Some("root"));
    assert_eq!(record.namespace_name, "cognitive-system");

    // A second registration with the same id is refused; the membrane degrades.
    let duplicate = MembraneClient::new(config(&registry, ns, "root", None)).expect("dup");
    assert!(!duplicate.register().await);

    root.shutdown().await;
    child.shutdown().await;
}

#[tokio::test]
async fn send_over_shared_volume_follows_hierarchy() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "ns").await;
    let inbox = tempfile::tempdir().expect("inbox");

    let root = MembraneClient::new(ClientConfig {
        communication_mode: CommunicationMode::SharedVolume,
        endpoint: Some(inbox.path().to_string_lossy().into_owned()),
        ..config(&registry, ns, "root", None)
    })
    .expect("root");
    let left = MembraneClient::new(config(&registry, ns, "left", Some("root"))).expect("left");
    assert!(root.register().await);
    assert!(left.register().await);

    left.send("root", serde_json::json!({ "task": "ping" }))
        .await
        .expect("send");

    let files: Vec<_> = std::fs::read_dir(inbox.path())
        .expect("read inbox")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(files.len(), 1);
    let envelope: Envelope =
        serde_json::from_slice(&std::fs::read(&files[0]).expect("read message")).expect("json");
    assert_eq!(envelope.sender, "left");
    assert_eq!(envelope.target, "root");
    assert_eq!(envelope.route, vec!["left", "root"]);
    assert_eq!(envelope.payload["task"], "ping");

    root.shutdown().await;
    left.shutdown().await;
}

#[tokio::test]
async fn stale_peers_disappear_until_reactivated() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "workers").await;
    let worker = MembraneClient::new(config(&registry, ns, "w1", None)).expect("worker");
    assert!(worker.register().await);
    worker.shutdown().await;

    registry.clock.advance(TimeDelta::seconds(301));
    assert_eq!(run_sweep_cycle(&registry.registry).await, Some(1));

    let observer = MembraneClient::new(config(&registry, ns, "observer", None)).expect("observer");
    assert!(observer.discover("w1").await.is_none());
    let err = observer
        .send("w1", serde_json::json!({}))
        .await
        .expect_err("stale target");
    assert!(matches!(err, SendError::TargetUnavailable(_)));

    assert!(worker.reactivate().await);
    assert!(observer.discover("w1").await.is_some());
}

#[tokio::test]
async fn deregister_removes_the_record() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "ns").await;
    let client = MembraneClient::new(config(&registry, ns, "m1", None)).expect("client");
    assert!(client.register().await);
    assert!(client.deregister().await);
    assert!(!client.is_registered());
    assert!(client.lookup_self().await.is_none());
    // Second attempt finds nothing to delete.
    assert!(!client.deregister().await);
}

#[tokio::test]
async fn unreachable_registry_degrades_without_error() {
    let client = MembraneClient::new(ClientConfig {
        registry_url: Some("http://127.0.0.1:1".to_string()),
        namespace_id: Some(NamespaceId::new()),
        membrane_id: "lonely".to_string(),
        request_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    })
    .expect("client");

    assert!(!client.register().await);
    assert!(!client.is_registered());
    assert!(!client.heartbeat().await);
    assert!(client.discover("peer").await.is_none());
    let err = client
        .send("peer", serde_json::json!({}))
        .await
        .expect_err("no peer");
    assert!(matches!(err, SendError::TargetUnavailable(_)));
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_background_tasks_promptly() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "ns").await;
    let client = MembraneClient::new(ClientConfig {
        heartbeat_interval: Duration::from_millis(20),
        discovery_ttl: Duration::from_millis(20),
        ..config(&registry, ns, "busy", None)
    })
    .expect("client");
    assert!(client.register().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown in time");
    // Stopping twice is harmless.
    client.shutdown().await;
}

#[tokio::test]
async fn ids_with_url_delimiters_keep_their_record_fresh() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "ns").await;
    let client =
        MembraneClient::new(config(&registry, ns, "cog/worker?x#y", None)).expect("client");
    assert!(client.register().await);
    assert!(client.heartbeat().await);

    let record = client.lookup_self().await.expect("self record");
    assert_eq!(record.membrane_id, "cog/worker?x#y");

    // Heartbeats are driven by hand from here on.
    client.shutdown().await;
    // A heartbeat that reached the record keeps it out of the sweep.
    registry.clock.advance(TimeDelta::seconds(200));
    assert!(client.heartbeat().await);
    registry.clock.advance(TimeDelta::seconds(200));
    assert_eq!(run_sweep_cycle(&registry.registry).await, Some(0));

    registry.clock.advance(TimeDelta::seconds(301));
    assert_eq!(run_sweep_cycle(&registry.registry).await, Some(1));
    assert!(client.reactivate().await);
    assert!(client.deregister().await);
    assert!(client.lookup_self().await.is_none());
}

#[tokio::test]
async fn list_peers_filters_by_parent_and_mode() {
    let registry = spawn_registry().await;
    let ns = namespace(&registry, "ns").await;
    let inbox = tempfile::tempdir().expect("inbox");
    let root = MembraneClient::new(config(&registry, ns, "root", None)).expect("root");
    let net = MembraneClient::new(config(&registry, ns, "net", Some("root"))).expect("net");
    let vol = MembraneClient::new(ClientConfig {
        communication_mode: CommunicationMode::SharedVolume,
        endpoint: Some(inbox.path().to_string_lossy().into_owned()),
        ..config(&registry, ns, "vol", Some("root"))
    })
    .expect("vol");
    for client in [&root, &net, &vol] {
        assert!(client.register().await);
    }

    let ids = |records: Vec<membrane_client::MembraneRecord>| {
        records.into_iter().map(|r| r.membrane_id).collect::<Vec<_>>()
    };
    let children = root.list_peers(Some("root"), None).await.expect("children");
    assert_eq!(ids(children), vec!["net", "vol"]);
    let shared = root
        .list_peers(None, Some(CommunicationMode::SharedVolume))
        .await
        .expect("shared");
    assert_eq!(ids(shared), vec!["vol"]);
    let network_children = root
        .list_peers(Some("root"), Some(CommunicationMode::Network))
        .await
        .expect("network");
    assert_eq!(ids(network_children), vec!["net"]);

    for client in [&root, &net, &vol] {
        client.shutdown().await;
    }
}
