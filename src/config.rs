use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enable_tracing: bool,
    /// Export delivery metrics over OTLP.
    pub enable_metrics: bool,
    /// OTLP collector endpoint, the exporter default when unset.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub interval_secs: u64,
    /// Blobs older than this are removed whether or not they were delivered.
    pub retention_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            retention_secs: 2 * 24 * 3600,
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_secs.saturating_mul(1000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub env: String,
    pub instance_id: Option<String>,
    pub listen_addr: String,
    pub state_store_path: String,
    pub blob_storage: BlobStorageConfig,
    /// Bound on each metadata or object store call before it is retried.
    pub store_timeout_secs: u64,
    pub structured_logging: bool,
    pub telemetry: TelemetryConfig,
    pub gc: GcConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = env::current_dir()
            .map(|dir| dir.join("wave_storage/state").display().to_string())
            .unwrap_or_else(|_| "wave_storage/state".to_string());
        ServerConfig {
            env: "local".to_string(),
            instance_id: None,
            listen_addr: "0.0.0.0:8900".to_string(),
            state_store_path,
            blob_storage: Default::default(),
            store_timeout_secs: 10,
            structured_logging: false,
            telemetry: Default::default(),
            gc: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(&config_str))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        match self.blob_storage.path.split_once("://") {
            Some((scheme, _)) if !scheme.is_empty() => {}
            _ => {
                return Err(anyhow!(
                    "blob storage path must be a url with a scheme, got: {}",
                    self.blob_storage.path
                ))
            }
        }
        if self.store_timeout_secs == 0 {
            return Err(anyhow!("store_timeout_secs must be greater than zero"));
        }
        if self.gc.interval_secs == 0 {
            return Err(anyhow!("gc.interval_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.env, std::process::id()))
    }

    pub fn structured_logging(&self) -> bool {
        self.structured_logging
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8900");
        assert_eq!(config.store_timeout(), Duration::from_secs(10));
        assert_eq!(config.gc.interval(), Duration::from_secs(3600));
        assert_eq!(config.gc.retention_ms(), 172_800_000);
        assert!(!config.telemetry.enable_tracing);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let file = write_config(
            r#"
env: prod
instance_id: wave-1
blob_storage:
  path: memory:///
gc:
  retention_secs: 60
telemetry:
  enable_tracing: true
  endpoint: http://collector:4317
"#,
        );
        let config = ServerConfig::from_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.env, "prod");
        assert_eq!(config.instance_id(), "wave-1");
        assert_eq!(config.blob_storage.path, "memory:///");
        assert_eq!(config.gc.retention_secs, 60);
        assert_eq!(config.gc.interval_secs, 3600);
        assert_eq!(config.listen_addr, "0.0.0.0:8900");
        assert_eq!(
            config.telemetry.endpoint.as_deref(),
            Some("http://collector:4317")
        );
    }

    #[test]
    fn test_rejects_bad_listen_addr() {
        let file = write_config("listen_addr: localhost\n");
        let err = ServerConfig::from_path(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn test_rejects_blob_path_without_scheme() {
        let config = ServerConfig {
            blob_storage: BlobStorageConfig {
                path: "/var/blobs".to_string(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
