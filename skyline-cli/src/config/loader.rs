use super::types::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SWEEP_INTERVAL, RawLogConfig, RawServerConfig,
    RawSkylineConfig, RawSourceConfig, RawStorageConfig, ServerSection, SkylineConfig,
};
use anyhow::{Result, bail};
use directories::ProjectDirs;
use skyline_events::{LogConfig, SourceConfig, StorageConfig};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<SkylineConfig> {
        let user = Self::user_config_path();
        let project = Self::project_config_path();
        Self::load_from(user.as_deref(), &project)
    }

    /// Load and merge the given files; missing files are skipped
    pub fn load_from(user_path: Option<&Path>, project_path: &Path) -> Result<SkylineConfig> {
        let mut raw = RawSkylineConfig::default();

        // Layer 1: User config
        if let Some(user_path) = user_path
            && user_path.exists()
        {
            let contents = std::fs::read_to_string(user_path)?;
            let user_config: RawSkylineConfig = toml::from_str(&contents)?;
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if project_path.exists() {
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: RawSkylineConfig = toml::from_str(&contents)?;
            raw = Self::merge_raw(raw, project_config);
        }

        // Convert to final config with defaults applied
        let config = Self::finalize(raw);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "skyline").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with SKYLINE_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("SKYLINE_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".skyline/config.toml")
        }
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawSkylineConfig, overlay: RawSkylineConfig) -> RawSkylineConfig {
        RawSkylineConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
                sweep_interval: overlay.server.sweep_interval.or(base.server.sweep_interval),
            },
            storage: RawStorageConfig {
                backend: overlay.storage.backend.or(base.storage.backend),
                data_dir: overlay.storage.data_dir.or(base.storage.data_dir),
            },
            alarms: Self::merge_log(base.alarms, overlay.alarms),
            clusters: Self::merge_log(base.clusters, overlay.clusters),
            source: RawSourceConfig {
                warning_reason: overlay.source.warning_reason.or(base.source.warning_reason),
            },
        }
    }

    fn merge_log(base: RawLogConfig, overlay: RawLogConfig) -> RawLogConfig {
        RawLogConfig {
            eviction: overlay.eviction.or(base.eviction),
            batch_size: overlay.batch_size.or(base.batch_size),
            subscriber_buffer: overlay.subscriber_buffer.or(base.subscriber_buffer),
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawSkylineConfig) -> SkylineConfig {
        let defaults = SkylineConfig::default();
        let storage_defaults = StorageConfig::default();

        SkylineConfig {
            server: ServerSection {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
                sweep_interval: raw.server.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL),
            },
            storage: StorageConfig {
                backend: raw.storage.backend.unwrap_or(storage_defaults.backend),
                data_dir: raw.storage.data_dir.unwrap_or(storage_defaults.data_dir),
            },
            alarms: Self::finalize_log(raw.alarms, defaults.alarms),
            clusters: Self::finalize_log(raw.clusters, defaults.clusters),
            source: SourceConfig {
                warning_reason: raw
                    .source
                    .warning_reason
                    .unwrap_or(defaults.source.warning_reason),
            },
        }
    }

    /// Reject values the server cannot run with
    fn validate(config: &SkylineConfig) -> Result<()> {
        if config.server.sweep_interval.is_zero() {
            bail!("server.sweep_interval must be greater than zero");
        }
        for (section, log) in [("alarms", &config.alarms), ("clusters", &config.clusters)] {
            if log.batch_size == 0 {
                bail!("{section}.batch_size must be at least 1");
            }
            if log.subscriber_buffer == 0 {
                bail!("{section}.subscriber_buffer must be at least 1");
            }
        }
        Ok(())
    }

    fn finalize_log(raw: RawLogConfig, defaults: LogConfig) -> LogConfig {
        LogConfig {
            eviction: raw.eviction.unwrap_or(defaults.eviction),
            batch_size: raw.batch_size.unwrap_or(defaults.batch_size),
            subscriber_buffer: raw.subscriber_buffer.unwrap_or(defaults.subscriber_buffer),
        }
    }
}
