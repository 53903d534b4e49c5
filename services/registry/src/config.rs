use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 300;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Postgres => "postgres",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

// Registry configuration sourced from environment variables, optionally
// overridden by a YAML file.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub sweep_interval: Duration,
    pub stale_threshold: Duration,
    pub reactivate_on_heartbeat: bool,
}

#[derive(Debug, Deserialize)]
struct RegistryConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    database_url: Option<String>,
    db_max_connections: Option<u32>,
    db_acquire_timeout_ms: Option<u64>,
    sweep_interval_secs: Option<u64>,
    stale_threshold_secs: Option<u64>,
    reactivate_on_heartbeat: Option<bool>,
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("parse {key}: {err}")),
        Err(_) => Ok(default),
    }
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("MEMBRANE_REGISTRY_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()
            .with_context(|| "parse MEMBRANE_REGISTRY_BIND")?;
        let metrics_bind = std::env::var("MEMBRANE_REGISTRY_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse MEMBRANE_REGISTRY_METRICS_BIND")?;
        let storage = env_parse("MEMBRANE_REGISTRY_STORAGE_BACKEND", StorageBackend::Memory)?;
        let postgres = match std::env::var("MEMBRANE_REGISTRY_DATABASE_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse(
                    "MEMBRANE_REGISTRY_DB_MAX_CONNECTIONS",
                    DEFAULT_DB_MAX_CONNECTIONS,
                )?,
                acquire_timeout_ms: env_parse(
                    "MEMBRANE_REGISTRY_DB_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_DB_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        let sweep_interval = Duration::from_secs(env_parse(
            "MEMBRANE_REGISTRY_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);
        let stale_threshold = Duration::from_secs(env_parse(
            "MEMBRANE_REGISTRY_STALE_THRESHOLD_SECS",
            DEFAULT_STALE_THRESHOLD_SECS,
        )?);
        let reactivate_on_heartbeat =
            env_parse("MEMBRANE_REGISTRY_REACTIVATE_ON_HEARTBEAT", false)?;
        let config = Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            sweep_interval,
            stale_threshold,
            reactivate_on_heartbeat,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("MEMBRANE_REGISTRY_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read MEMBRANE_REGISTRY_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: RegistryConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse registry config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(url) = override_cfg.database_url {
            let pg = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_DB_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_DB_ACQUIRE_TIMEOUT_MS,
            });
            pg.url = url;
        }
        if let Some(pg) = self.postgres.as_mut() {
            if let Some(value) = override_cfg.db_max_connections {
                pg.max_connections = value;
            }
            if let Some(value) = override_cfg.db_acquire_timeout_ms {
                pg.acquire_timeout_ms = value;
            }
        }
        if let Some(value) = override_cfg.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(value);
        }
        if let Some(value) = override_cfg.stale_threshold_secs {
            self.stale_threshold = Duration::from_secs(value);
        }
        if let Some(value) = override_cfg.reactivate_on_heartbeat {
            self.reactivate_on_heartbeat = value;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        // tokio::time::interval panics on a zero period.
        if self.sweep_interval.is_zero() {
            bail!("sweep interval must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "MEMBRANE_REGISTRY_BIND",
        "MEMBRANE_REGISTRY_METRICS_BIND",
        "MEMBRANE_REGISTRY_STORAGE_BACKEND",
        "MEMBRANE_REGISTRY_DATABASE_URL",
        "MEMBRANE_REGISTRY_DB_MAX_CONNECTIONS",
        "MEMBRANE_REGISTRY_DB_ACQUIRE_TIMEOUT_MS",
        "MEMBRANE_REGISTRY_SWEEP_INTERVAL_SECS",
        "MEMBRANE_REGISTRY_STALE_THRESHOLD_SECS",
        "MEMBRANE_REGISTRY_REACTIVATE_ON_HEARTBEAT",
        "MEMBRANE_REGISTRY_CONFIG",
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
                    Some(value) => unsafe {
                        std::env::set_var(key, value);
                    },
                    None => unsafe {
                        std::env::remove_var(key);
                    },
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        let _guard = EnvGuard::clean();
        let config = RegistryConfig::from_env().expect("config");
        assert_eq!(config.bind_addr, "0.0.0.0:8000".parse().expect("addr"));
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stale_threshold, Duration::from_secs(300));
        assert!(!config.reactivate_on_heartbeat);
    }

    #[test]
    #[serial]
    fn env_overrides_are_parsed() {
        let guard = EnvGuard::clean();
        guard.set("MEMBRANE_REGISTRY_BIND", "127.0.0.1:7000");
        guard.set("MEMBRANE_REGISTRY_STORAGE_BACKEND", "postgres");
        guard.set("MEMBRANE_REGISTRY_DATABASE_URL", "postgres://localhost/registry");
        guard.set("MEMBRANE_REGISTRY_DB_MAX_CONNECTIONS", "3");
        guard.set("MEMBRANE_REGISTRY_STALE_THRESHOLD_SECS", "90");
        guard.set("MEMBRANE_REGISTRY_REACTIVATE_ON_HEARTBEAT", "true");

        let config = RegistryConfig::from_env().expect("config");
        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.url, "postgres://localhost/registry");
        assert_eq!(pg.max_connections, 3);
        assert_eq!(pg.acquire_timeout_ms, DEFAULT_DB_ACQUIRE_TIMEOUT_MS);
        assert_eq!(config.stale_threshold, Duration::from_secs(90));
        assert!(config.reactivate_on_heartbeat);
    }

    #[test]
    #[serial]
    fn malformed_values_are_errors() {
        let guard = EnvGuard::clean();
        guard.set("MEMBRANE_REGISTRY_SWEEP_INTERVAL_SECS", "soon");
        let err = RegistryConfig::from_env().expect_err("bad interval");
        assert!(err.to_string().contains("MEMBRANE_REGISTRY_SWEEP_INTERVAL_SECS"));

        guard.set("MEMBRANE_REGISTRY_SWEEP_INTERVAL_SECS", "0");
        assert!(RegistryConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn yaml_file_overrides_env() {
        let guard = EnvGuard::clean();
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        std::io::Write::write_all(
            &mut file,
            b"bind_addr: 127.0.0.1:9100\nstorage: postgres\ndatabase_url: postgres://db/registry\nsweep_interval_secs: 5\n",
        )
        .expect("write yaml");
        guard.set(
            "MEMBRANE_REGISTRY_CONFIG",
            file.path().to_str().expect("utf8 path"),
        );

        let config = RegistryConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.postgres.map(|pg| pg.url),
            Some("postgres://db/registry".to_string())
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let guard = EnvGuard::clean();
        guard.set("MEMBRANE_REGISTRY_CONFIG", "/nonexistent/registry.yaml");
        let err = RegistryConfig::from_env_or_yaml().expect_err("missing file");
        assert!(err.to_string().contains("MEMBRANE_REGISTRY_CONFIG"));
    }
}
