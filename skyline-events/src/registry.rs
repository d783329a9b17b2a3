//! Per-cluster event logs.
//!
//! The cluster supervisor calls [`ClusterRegistry::on_cluster_added`] when a
//! managed cluster comes under control and
//! [`ClusterRegistry::on_cluster_removed`] when it leaves. Each cluster gets
//! its own [`EventLog`] over a table opened from the registry's
//! [`TableProvider`], so re-adding a cluster rehydrates its history.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::log::EventLog;
use crate::record::EventRecord;
use crate::source::{ClusterEventFilter, RawClusterEvent};
use crate::store::TableProvider;

/// Table name backing a cluster's log.
pub fn cluster_table_name(cluster: &str) -> String {
    format!("cluster-{cluster}")
}

/// Owns the `cluster name -> EventLog` map.
pub struct ClusterRegistry {
    provider: Arc<dyn TableProvider>,
    config: LogConfig,
    filter: ClusterEventFilter,
    logs: RwLock<HashMap<String, EventLog>>,
}

impl ClusterRegistry {
    pub fn new(
        provider: Arc<dyn TableProvider>,
        config: LogConfig,
        filter: ClusterEventFilter,
    ) -> Self {
        Self {
            provider,
            config,
            filter,
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn filter(&self) -> &ClusterEventFilter {
        &self.filter
    }

    /// Register a cluster, opening its log. Idempotent.
    pub async fn on_cluster_added(&self, name: &str) -> Result<EventLog> {
        if let Some(log) = self.logs.read().await.get(name) {
            return Ok(log.clone());
        }

        let mut logs = self.logs.write().await;
        if let Some(log) = logs.get(name) {
            return Ok(log.clone());
        }

        let table = self.provider.open(&cluster_table_name(name)).await?;
        let log = EventLog::open(name, self.config.clone(), table).await?;
        logs.insert(name.to_string(), log.clone());

        info!(cluster = %name, clusters = logs.len(), "Cluster added");
        Ok(log)
    }

    /// Unregister a cluster and close its log.
    ///
    /// Returns false if the cluster was not registered. Persisted records
    /// are kept.
    pub async fn on_cluster_removed(&self, name: &str) -> bool {
        let removed = self.logs.write().await.remove(name);
        match removed {
            Some(log) => {
                log.close().await;
                info!(cluster = %name, "Cluster removed");
                true
            }
            None => {
                debug!(cluster = %name, "Ignoring removal of unknown cluster");
                false
            }
        }
    }

    pub async fn get(&self, name: &str) -> Result<EventLog> {
        self.logs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCluster(name.to_string()))
    }

    /// Registered cluster names, sorted.
    pub async fn clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.logs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }

    /// Filter a raw event and append it to the cluster's log.
    ///
    /// Returns `Ok(None)` when the event is filtered out or suppressed as a
    /// repeat.
    pub async fn ingest(&self, name: &str, event: &RawClusterEvent) -> Result<Option<EventRecord>> {
        let log = self.get(name).await?;
        let Some(draft) = self.filter.to_draft(name, event) else {
            trace!(
                cluster = %name,
                event_type = %event.event_type,
                reason = %event.reason,
                kind = %event.involved_object.kind,
                "Event filtered out"
            );
            return Ok(None);
        };
        log.append(draft).await
    }

    /// Run the eviction policy on every cluster log.
    pub async fn evict_expired(&self) -> usize {
        let logs: Vec<EventLog> = self.logs.read().await.values().cloned().collect();
        let mut evicted = 0;
        for log in logs {
            evicted += log.evict_expired().await;
        }
        evicted
    }

    /// Close every cluster log.
    pub async fn shutdown(&self) {
        let logs: Vec<(String, EventLog)> = self.logs.write().await.drain().collect();
        for (_, log) in &logs {
            log.close().await;
        }
        info!(clusters = logs.len(), "Cluster registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{InvolvedObject, WARNING_TYPE};
    use crate::store::MemoryTables;

    fn registry() -> ClusterRegistry {
        ClusterRegistry::new(
            Arc::new(MemoryTables::new()),
            LogConfig::default(),
            ClusterEventFilter::default(),
        )
    }

    fn warning(name: &str) -> RawClusterEvent {
        RawClusterEvent {
            event_type: WARNING_TYPE.to_string(),
            reason: "FailedScheduling".to_string(),
            message: "Insufficient cpu".to_string(),
            involved_object: InvolvedObject {
                kind: "Pod".to_string(),
                name: name.to_string(),
                namespace: "default".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn added_cluster_gets_a_log() {
        let registry = registry();
        registry.on_cluster_added("prod").await.unwrap();
        registry.on_cluster_added("edge").await.unwrap();

        assert_eq!(registry.clusters().await, vec!["edge", "prod"]);
        assert_eq!(registry.get("prod").await.unwrap().name(), "prod");
    }

    #[tokio::test]
    async fn adding_twice_returns_the_same_log() {
        let registry = registry();
        let first = registry.on_cluster_added("prod").await.unwrap();
        first.append(crate::RecordDraft::cluster_event("prod", "Pod").with_name("a"))
            .await
            .unwrap();

        let second = registry.on_cluster_added("prod").await.unwrap();
        assert_eq!(second.stats().await.last_id, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_cluster_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.get("ghost").await,
            Err(Error::UnknownCluster(name)) if name == "ghost"
        ));
        assert!(matches!(
            registry.ingest("ghost", &warning("web-0")).await,
            Err(Error::UnknownCluster(_))
        ));
    }

    #[tokio::test]
    async fn ingest_filters_and_appends() {
        let registry = registry();
        registry.on_cluster_added("prod").await.unwrap();

        let record = registry
            .ingest("prod", &warning("web-0"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.cluster, "prod");
        assert_eq!(record.name, "web-0");

        let mut normal = warning("web-1");
        normal.event_type = "Normal".to_string();
        assert!(registry.ingest("prod", &normal).await.unwrap().is_none());

        // Immediate repeat is suppressed.
        assert!(registry.ingest("prod", &warning("web-0")).await.unwrap().is_none());
        assert_eq!(registry.get("prod").await.unwrap().stats().await.last_id, 1);
    }

    #[tokio::test]
    async fn removal_closes_the_log() {
        let registry = registry();
        let log = registry.on_cluster_added("prod").await.unwrap();

        assert!(registry.on_cluster_removed("prod").await);
        assert!(log.is_closed().await);
        assert!(registry.clusters().await.is_empty());
        assert!(!registry.on_cluster_removed("prod").await);
    }

    #[tokio::test]
    async fn re_added_cluster_rehydrates_history() {
        let registry = registry();
        registry.on_cluster_added("prod").await.unwrap();
        registry.ingest("prod", &warning("web-0")).await.unwrap();
        registry.ingest("prod", &warning("web-1")).await.unwrap();
        registry.on_cluster_removed("prod").await;

        let log = registry.on_cluster_added("prod").await.unwrap();
        let stats = log.stats().await;
        assert_eq!(stats.last_id, 2);
        assert_eq!(stats.unacknowledged, 2);
    }

    #[tokio::test]
    async fn re_added_cluster_keeps_ids_after_everything_was_evicted() {
        let registry = ClusterRegistry::new(
            Arc::new(MemoryTables::new()),
            LogConfig::default().with_capacity(0),
            ClusterEventFilter::default(),
        );
        registry.on_cluster_added("prod").await.unwrap();
        registry.ingest("prod", &warning("web-0")).await.unwrap();
        registry.ingest("prod", &warning("web-1")).await.unwrap();
        registry.on_cluster_removed("prod").await;

        let log = registry.on_cluster_added("prod").await.unwrap();
        assert_eq!(log.stats().await.last_id, 2);

        let record = registry
            .ingest("prod", &warning("web-2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, 3);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let registry = registry();
        let prod = registry.on_cluster_added("prod").await.unwrap();
        let edge = registry.on_cluster_added("edge").await.unwrap();

        registry.shutdown().await;
        assert!(prod.is_closed().await);
        assert!(edge.is_closed().await);
        assert!(registry.is_empty().await);
    }
}
