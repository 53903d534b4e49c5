// Client-side configuration: environment first, then an optional YAML override.
use anyhow::{Context, Result};
use membrane_common::CommunicationMode;
use membrane_common::ids::NamespaceId;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DISCOVERY_TTL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MEMBRANE_ID: &str = "membrane";
pub const DEFAULT_HOST: &str = "localhost";

/// Settings for one membrane process.
///
/// `registry_url` or `namespace_id` being unset disables registry integration;
/// the client then runs in degraded mode without discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub registry_url: Option<String>,
    pub namespace_id: Option<NamespaceId>,
    pub membrane_id: String,
    pub parent_membrane: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub communication_mode: CommunicationMode,
    pub endpoint: Option<String>,
    pub capabilities: Vec<String>,
    pub heartbeat_interval: Duration,
    pub discovery_ttl: Duration,
    pub request_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_url: None,
            namespace_id: None,
            membrane_id: DEFAULT_MEMBRANE_ID.to_string(),
            parent_membrane: None,
            host: DEFAULT_HOST.to_string(),
            port: None,
            communication_mode: CommunicationMode::default(),
            endpoint: None,
            capabilities: Vec::new(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            discovery_ttl: Duration::from_secs(DEFAULT_DISCOVERY_TTL_SECS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    registry_url: Option<String>,
    namespace_id: Option<String>,
    membrane_id: Option<String>,
    parent_membrane: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    communication_mode: Option<String>,
    endpoint: Option<String>,
    capabilities: Option<Vec<String>>,
    heartbeat_interval_secs: Option<u64>,
    discovery_ttl_secs: Option<u64>,
    request_timeout_ms: Option<u64>,
    send_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("MEMBRANE_CLIENT_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read client config: {path}"))?;
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    /// Read `MEMBRANE_*` variables. Malformed values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_string_env("MEMBRANE_REGISTRY_URL") {
            config.registry_url = Some(value);
        }
        if let Some(value) = read_string_env("MEMBRANE_NAMESPACE_ID")
            .and_then(|value| value.parse::<NamespaceId>().ok())
        {
            config.namespace_id = Some(value);
        }
        if let Some(value) = read_string_env("MEMBRANE_ID") {
            config.membrane_id = value;
        }
        if let Some(value) = read_string_env("MEMBRANE_PARENT") {
            config.parent_membrane = Some(value);
        }
        if let Some(value) = read_string_env("MEMBRANE_HOST") {
            config.host = value;
        }
        if let Some(value) = read_string_env("MEMBRANE_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .filter(|value| *value > 0)
        {
            config.port = Some(value);
        }
        if let Some(value) = read_string_env("MEMBRANE_COMMUNICATION_MODE")
            .and_then(|value| value.parse::<CommunicationMode>().ok())
        {
            config.communication_mode = value;
        }
        if let Some(value) = read_string_env("MEMBRANE_ENDPOINT") {
            config.endpoint = Some(value);
        }
        if let Some(value) = read_u64_env("MEMBRANE_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = Duration::from_secs(value);
        }
        if let Some(value) = read_u64_env("MEMBRANE_DISCOVERY_TTL_SECS") {
            config.discovery_ttl = Duration::from_secs(value);
        }
        if let Some(value) = read_u64_env("MEMBRANE_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("MEMBRANE_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(value);
        }
        config
    }

    /// Whether enough is configured to talk to a registry at all.
    pub fn registry_enabled(&self) -> bool {
        self.registry_url.is_some() && self.namespace_id.is_some()
    }
}

impl ClientConfigOverride {
    fn apply(self, config: &mut ClientConfig) {
        if let Some(value) = self.registry_url.filter(|v| !v.trim().is_empty()) {
            config.registry_url = Some(value);
        }
        if let Some(value) = self
            .namespace_id
            .and_then(|value| value.parse::<NamespaceId>().ok())
        {
            config.namespace_id = Some(value);
        }
        if let Some(value) = self.membrane_id.filter(|v| !v.trim().is_empty()) {
            config.membrane_id = value;
        }
        if let Some(value) = self.parent_membrane {
            config.parent_membrane = Some(value);
        }
        if let Some(value) = self.host.filter(|v| !v.trim().is_empty()) {
            config.host = value;
        }
        if let Some(value) = self.port
            && value > 0
        {
            config.port = Some(value);
        }
        if let Some(value) = self
            .communication_mode
            .and_then(|value| value.parse::<CommunicationMode>().ok())
        {
            config.communication_mode = value;
        }
        if let Some(value) = self.endpoint {
            config.endpoint = Some(value);
        }
        if let Some(value) = self.capabilities {
            config.capabilities = value;
        }
        if let Some(value) = self.heartbeat_interval_secs
            && value > 0
        {
            config.heartbeat_interval = Duration::from_secs(value);
        }
        if let Some(value) = self.discovery_ttl_secs
            && value > 0
        {
            config.discovery_ttl = Duration::from_secs(value);
        }
        if let Some(value) = self.request_timeout_ms
            && value > 0
        {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.send_timeout_ms
            && value > 0
        {
            config.send_timeout = Duration::from_millis(value);
        }
    }
}

fn read_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const KEYS: &[&str] = &[
        "MEMBRANE_REGISTRY_URL",
        "MEMBRANE_NAMESPACE_ID",
        "MEMBRANE_ID",
        "MEMBRANE_PARENT",
        "MEMBRANE_HOST",
        "MEMBRANE_PORT",
        "MEMBRANE_COMMUNICATION_MODE",
        "MEMBRANE_ENDPOINT",
        "MEMBRANE_HEARTBEAT_INTERVAL_SECS",
        "MEMBRANE_DISCOVERY_TTL_SECS",
        "MEMBRANE_REQUEST_TIMEOUT_MS",
        "MEMBRANE_SEND_TIMEOUT_MS",
        "MEMBRANE_CLIENT_CONFIG",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = KEYS
                .iter()
                .map(|key| (*key, std::env::var(key).ok()))
                .collect();
            for key in KEYS {
                unsafe {
                    std::env::remove_var(key);
                }
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(value) => unsafe { std::env::set_var(key, value) },
                    None => unsafe { std::env::remove_var(key) },
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_disable_registry() {
        let _env = EnvGuard::clean();
        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        assert_eq!(config, ClientConfig::default());
        assert!(!config.registry_enabled());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn env_values_are_read() {
        let env = EnvGuard::clean();
        let namespace = NamespaceId::new();
        env.set("MEMBRANE_REGISTRY_URL", "http://registry:8000");
        env.set("MEMBRANE_NAMESPACE_ID", &namespace.to_string());
        env.set("MEMBRANE_ID", "worker-1");
        env.set("MEMBRANE_PARENT", "root");
        env.set("MEMBRANE_PORT", "9000");
        env.set("MEMBRANE_COMMUNICATION_MODE", "shared-volume");
        env.set("MEMBRANE_HEARTBEAT_INTERVAL_SECS", "10");

        let config = ClientConfig::from_env();
        assert!(config.registry_enabled());
        assert_eq!(config.namespace_id, Some(namespace));
        assert_eq!(config.membrane_id, "worker-1");
        assert_eq!(config.parent_membrane.as_deref(), Some("root"));
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.communication_mode, CommunicationMode::SharedVolume);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn malformed_env_values_keep_defaults() {
        let env = EnvGuard::clean();
        env.set("MEMBRANE_NAMESPACE_ID", "not-a-uuid");
        env.set("MEMBRANE_PORT", "99999");
        env.set("MEMBRANE_COMMUNICATION_MODE", "carrier-pigeon");
        env.set("MEMBRANE_DISCOVERY_TTL_SECS", "0");
        env.set("MEMBRANE_SEND_TIMEOUT_MS", "soon");

        let config = ClientConfig::from_env();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        let env = EnvGuard::clean();
        env.set("MEMBRANE_ID", "from-env");
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "membrane_id: from-yaml\ncommunication_mode: ipc\nsend_timeout_ms: 250\nport: 0"
        )
        .expect("write");
        env.set("MEMBRANE_CLIENT_CONFIG", file.path().to_str().expect("path"));

        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        assert_eq!(config.membrane_id, "from-yaml");
        assert_eq!(config.communication_mode, CommunicationMode::Ipc);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.port, None);
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let _env = EnvGuard::clean();
        let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/membrane.yaml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("read client config"));
    }
}
