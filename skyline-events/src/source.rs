//! Admission filter for raw Kubernetes events.
//!
//! The watch layer forwards every event it sees; only warnings with the
//! configured reason on an allow-listed object kind become log records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::RecordDraft;

/// Default reason admitted by [`ClusterEventFilter`].
pub const DEFAULT_WARNING_REASON: &str = "FailedScheduling";

/// Kubernetes event type for warnings.
pub const WARNING_TYPE: &str = "Warning";

/// Object kinds whose events are harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedKind {
    Cluster,
    Node,
    Namespace,
    Pod,
    StatefulSet,
    Deployment,
    DaemonSet,
    StorageClass,
    PersistentVolume,
    PersistentVolumeClaim,
}

impl WatchedKind {
    pub const ALL: [WatchedKind; 10] = [
        Self::Cluster,
        Self::Node,
        Self::Namespace,
        Self::Pod,
        Self::StatefulSet,
        Self::Deployment,
        Self::DaemonSet,
        Self::StorageClass,
        Self::PersistentVolume,
        Self::PersistentVolumeClaim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::Node => "Node",
            Self::Namespace => "Namespace",
            Self::Pod => "Pod",
            Self::StatefulSet => "StatefulSet",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StorageClass => "StorageClass",
            Self::PersistentVolume => "PersistentVolume",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }

    /// Kinds that live outside any namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            Self::Cluster | Self::Node | Self::Namespace | Self::StorageClass | Self::PersistentVolume
        )
    }
}

impl fmt::Display for WatchedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unwatched kind: {s}"))
    }
}

pub(crate) fn is_cluster_scoped(kind_name: &str) -> bool {
    kind_name
        .parse::<WatchedKind>()
        .is_ok_and(|kind| kind.is_cluster_scoped())
}

/// The object an event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvolvedObject {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// The subset of a Kubernetes `Event` the filter looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClusterEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub involved_object: InvolvedObject,
}

/// Decides which raw events become records.
#[derive(Debug, Clone)]
pub struct ClusterEventFilter {
    reason: String,
}

impl Default for ClusterEventFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_REASON)
    }
}

impl ClusterEventFilter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the admitted kind, or `None` when the event is filtered out.
    pub fn admits(&self, event: &RawClusterEvent) -> Option<WatchedKind> {
        if event.event_type != WARNING_TYPE || event.reason != self.reason {
            return None;
        }
        event.involved_object.kind.parse().ok()
    }

    /// Convert an admitted event into a draft for `cluster`.
    pub fn to_draft(&self, cluster: &str, event: &RawClusterEvent) -> Option<RecordDraft> {
        let kind = self.admits(event)?;
        let namespace = if kind.is_cluster_scoped() {
            String::new()
        } else {
            event.involved_object.namespace.clone()
        };

        Some(
            RecordDraft::cluster_event(cluster, kind.as_str())
                .with_namespace(namespace)
                .with_name(event.involved_object.name.clone())
                .with_reason(event.reason.clone())
                .with_message(event.message.clone()),
        )
    }
}
