//! Error types for the skyline event log.

use crate::store::StoreError;

/// Error type for event log operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write to the backing table failed; the operation was aborted.
    #[error("persistence failure in log {log}: {source}")]
    Persistence {
        log: String,
        #[source]
        source: StoreError,
    },

    /// The record was evicted or never existed.
    #[error("record {0} not found")]
    NotFound(u64),

    /// A record could not be encoded for the backing table.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The log has been torn down.
    #[error("log {0} is closed")]
    Closed(String),

    /// No log is registered for the cluster.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// The backing table could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Result type alias for event log operations.
pub type Result<T> = std::result::Result<T, Error>;
