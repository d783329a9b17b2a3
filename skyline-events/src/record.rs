//! Event records stored in the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Warning event harvested from a managed cluster.
    ClusterEvent,
    /// Alarm raised by application code.
    ApplicationAlarm,
}

/// One alarm/event entry in the log.
///
/// Everything except `acknowledged` is fixed once the log has assigned the
/// record its id. The serialized form is flat and is used both for the
/// backing table and as the WebSocket payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Log-assigned id, strictly increasing in append order.
    pub id: u64,
    /// When the log accepted the record.
    pub created_at: DateTime<Utc>,
    /// Origin discriminator.
    pub kind: EventKind,
    pub cluster: String,
    /// Empty for cluster- and node-scoped objects.
    pub namespace: String,
    /// Kubernetes kind of the involved object (e.g. `Pod`).
    pub kind_name: String,
    pub name: String,
    pub reason: String,
    pub message: String,
    /// Flips to true once and never reverts.
    pub acknowledged: bool,
}

impl EventRecord {
    pub(crate) fn from_draft(id: u64, created_at: DateTime<Utc>, draft: RecordDraft) -> Self {
        Self {
            id,
            created_at,
            kind: draft.kind,
            cluster: draft.cluster,
            namespace: draft.namespace,
            kind_name: draft.kind_name,
            name: draft.name,
            reason: draft.reason,
            message: draft.message,
            acknowledged: false,
        }
    }

    /// The tuple used to suppress immediate repeats.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
            kind_name: self.kind_name.clone(),
            name: self.name.clone(),
            reason: self.reason.clone(),
            message: self.message.clone(),
        }
    }
}

/// Candidate record handed to [`EventLog::append`](crate::EventLog::append).
///
/// The log assigns the id and timestamp; callers never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub kind: EventKind,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    pub kind_name: String,
    pub name: String,
    pub reason: String,
    pub message: String,
}

impl RecordDraft {
    /// Draft for a warning event observed in `cluster`.
    pub fn cluster_event(cluster: impl Into<String>, kind_name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ClusterEvent,
            cluster: cluster.into(),
            namespace: String::new(),
            kind_name: kind_name.into(),
            name: String::new(),
            reason: String::new(),
            message: String::new(),
        }
    }

    /// Draft for an application-raised alarm.
    pub fn alarm(kind_name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ApplicationAlarm,
            ..Self::cluster_event(String::new(), kind_name)
        }
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Clear the namespace when the kind has no namespace concept.
    pub(crate) fn normalized(mut self) -> Self {
        if crate::source::is_cluster_scoped(&self.kind_name) {
            self.namespace.clear();
        }
        self
    }

    pub(crate) fn dedup_key(&self) -> DedupKey {
        DedupKey {
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
            kind_name: self.kind_name.clone(),
            name: self.name.clone(),
            reason: self.reason.clone(),
            message: self.message.clone(),
        }
    }
}

/// `(cluster, namespace, kind_name, name, reason, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    cluster: String,
    namespace: String,
    kind_name: String,
    name: String,
    reason: String,
    message: String,
}
