use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyline_events::{EvictionPolicy, LogConfig, SourceConfig, StorageBackend, StorageConfig};

/// Default host for the skyline server
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port for the skyline server
pub const DEFAULT_PORT: u16 = 7480;

/// Default interval between retention sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default alarm retention
pub const DEFAULT_ALARM_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of records kept per cluster
pub const DEFAULT_CLUSTER_CAPACITY: usize = 1000;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSkylineConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub storage: RawStorageConfig,

    #[serde(default)]
    pub alarms: RawLogConfig,

    #[serde(default)]
    pub clusters: RawLogConfig,

    #[serde(default)]
    pub source: RawSourceConfig,
}

/// Server config as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStorageConfig {
    pub backend: Option<StorageBackend>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawLogConfig {
    pub eviction: Option<EvictionPolicy>,
    pub batch_size: Option<usize>,
    pub subscriber_buffer: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSourceConfig {
    pub warning_reason: Option<String>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkylineConfig {
    pub server: ServerSection,
    pub storage: StorageConfig,
    /// Application alarm log
    pub alarms: LogConfig,
    /// Settings applied to every cluster log
    pub clusters: LogConfig,
    pub source: SourceConfig,
}

impl Default for SkylineConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            storage: StorageConfig::default(),
            alarms: LogConfig::default().with_retention_age(DEFAULT_ALARM_RETENTION),
            clusters: LogConfig::default().with_capacity(DEFAULT_CLUSTER_CAPACITY),
            source: SourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Host address to bind to
    pub host: String,

    /// Port for the skyline server
    pub port: u16,

    /// How often expired records are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SkylineConfig {
    /// Server configuration for this config
    pub fn to_server_config(&self) -> skyline_server::ServerConfig {
        skyline_server::ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            sweep_interval: self.server.sweep_interval,
            state: skyline_server::StateConfig {
                storage: self.storage.clone(),
                alarm_log: self.alarms.clone(),
                cluster_log: self.clusters.clone(),
                source: self.source.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SkylineConfig::default();
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(
            config.alarms.eviction,
            EvictionPolicy::RetentionAge(DEFAULT_ALARM_RETENTION)
        );
        assert_eq!(
            config.clusters.eviction,
            EvictionPolicy::Capacity(DEFAULT_CLUSTER_CAPACITY)
        );
        assert_eq!(config.source.warning_reason, "FailedScheduling");
    }

    #[test]
    fn test_raw_config_parses_partial_sections() {
        let raw: RawSkylineConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            sweep_interval = "5m"

            [clusters]
            eviction = { capacity = 200 }
            "#,
        )
        .unwrap();

        assert_eq!(raw.server.port, Some(9000));
        assert!(raw.server.host.is_none());
        assert_eq!(raw.server.sweep_interval, Some(Duration::from_secs(300)));
        assert_eq!(raw.clusters.eviction, Some(EvictionPolicy::Capacity(200)));
        assert!(raw.alarms.eviction.is_none());
    }

    #[test]
    fn test_server_config_conversion() {
        let config = SkylineConfig::default();
        let server = config.to_server_config();
        assert_eq!(server.port, DEFAULT_PORT);
        assert_eq!(server.state.cluster_log.eviction, config.clusters.eviction);
    }

    #[test]
    fn test_final_config_roundtrips_through_toml() {
        let config = SkylineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("retention_age = \"7days\""));

        let parsed: SkylineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.alarms.eviction, config.alarms.eviction);
        assert_eq!(parsed.server.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }
}
