//! Bounded, persistent alert event log for skyline.
//!
//! This crate keeps the alarm and cluster-event history of the control plane.
//! Each log assigns monotonically increasing ids, suppresses immediate
//! repeats, evicts by capacity or age, and fans records out to any number of
//! independent subscribers.
//!
//! # Key Types
//!
//! - [`EventLog`] - Append, acknowledge, drain and subscribe
//! - [`Subscription`] - Per-subscriber delivery task with its own cursor
//! - [`CursorScanner`] - Resume-from-cursor lookup
//! - [`ClusterRegistry`] - One log per managed cluster
//! - [`Table`] - Transactional backing store ([`MemoryTable`], [`FileTable`])

pub mod config;
pub mod error;
mod log;
pub mod record;
pub mod registry;
pub mod scanner;
pub mod source;
pub mod store;
pub mod subscription;

// Re-exports
pub use config::{EvictionPolicy, LogConfig, SourceConfig, StorageBackend, StorageConfig};
pub use error::{Error, Result};
pub use log::{AckFilter, EventLog, LogStats};
pub use record::{DedupKey, EventKind, EventRecord, RecordDraft};
pub use registry::{ClusterRegistry, cluster_table_name};
pub use scanner::{CursorScanner, ScanDirection, ScanPosition};
pub use source::{ClusterEventFilter, InvolvedObject, RawClusterEvent, WatchedKind};
pub use store::{
    FileTable, FileTables, MemoryTable, MemoryTables, StoreError, StoreResult, Table,
    TableProvider, Transaction,
};
pub use subscription::{
    StartPosition, Subscription, SubscriptionConfig, SubscriptionEvent, SubscriptionState,
};

/// Name of the global application alarm log.
pub const ALARM_LOG: &str = "alarms";

/// Open the table backend described by `config`.
pub fn table_provider(config: &StorageConfig) -> std::sync::Arc<dyn TableProvider> {
    match config.backend {
        StorageBackend::Memory => std::sync::Arc::new(MemoryTables::new()),
        StorageBackend::File => std::sync::Arc::new(FileTables::new(config.data_dir.clone())),
    }
}
