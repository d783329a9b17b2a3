//! Shared application state for the skyline server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skyline_events::{
    ALARM_LOG, ClusterEventFilter, ClusterRegistry, EventLog, LogConfig, MemoryTables,
    SourceConfig, StorageConfig, TableProvider, table_provider,
};
use tracing::info;

use crate::ServerError;

/// Log and storage settings the state is built from.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub storage: StorageConfig,
    pub alarm_log: LogConfig,
    pub cluster_log: LogConfig,
    pub source: SourceConfig,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            alarm_log: LogConfig::default()
                .with_retention_age(std::time::Duration::from_secs(7 * 24 * 60 * 60)),
            cluster_log: LogConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Global application alarm log
    pub alarms: EventLog,
    /// Per-cluster event logs
    pub clusters: Arc<ClusterRegistry>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the alarm log and an empty cluster registry over the configured storage.
    pub async fn open(config: StateConfig) -> Result<Self, ServerError> {
        let provider = table_provider(&config.storage);
        let backend = config.storage.backend;
        let data_dir = config.storage.data_dir.clone();
        let state = Self::with_provider(provider, config).await?;
        info!(
            ?backend,
            data_dir = %data_dir.display(),
            unacknowledged = state.alarms.unacknowledged_count().await,
            "Application state ready"
        );
        Ok(state)
    }

    /// State over an explicit table provider.
    pub async fn with_provider(
        provider: Arc<dyn TableProvider>,
        config: StateConfig,
    ) -> Result<Self, ServerError> {
        let table = provider.open(ALARM_LOG).await.map_err(skyline_events::Error::from)?;
        let alarms = EventLog::open(ALARM_LOG, config.alarm_log, table).await?;
        let clusters = Arc::new(ClusterRegistry::new(
            provider,
            config.cluster_log,
            ClusterEventFilter::new(config.source.warning_reason),
        ));

        Ok(Self {
            alarms,
            clusters,
            started_at: Utc::now(),
        })
    }

    /// In-memory state with default log settings
    pub async fn new_for_testing() -> Result<Self, ServerError> {
        let config = StateConfig {
            storage: StorageConfig::memory(),
            ..StateConfig::default()
        };
        Self::with_provider(Arc::new(MemoryTables::new()), config).await
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Close every log, stopping all of their subscriptions.
    pub async fn close(&self) {
        self.clusters.shutdown().await;
        self.alarms.close().await;
    }
}
