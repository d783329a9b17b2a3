//! WebSocket module for streaming event logs

mod gateway;
mod protocol;

pub use gateway::{ClusterStreamQuery, alarm_stream, cluster_stream, stream_log};
pub use protocol::ServerMessage;
