//! Server error types

use thiserror::Error;

/// Errors that can occur in the skyline server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An event log operation failed
    #[error(transparent)]
    Events(#[from] skyline_events::Error),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
