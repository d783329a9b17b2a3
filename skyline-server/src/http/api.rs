//! REST API handlers and types shared by the log endpoints

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use skyline_events::{AckFilter, EventLog, EventRecord};

use crate::AppState;

/// Default and maximum page sizes for record listings
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    /// Number of registered clusters
    pub clusters: usize,
    /// Unacknowledged application alarms
    pub unacknowledged_alarms: u64,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        clusters: state.clusters.len().await,
        unacknowledged_alarms: state.alarms.unacknowledged_count().await,
    })
}

/// Query params for record listings
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    /// Return records with an id greater than this
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
    /// Only unacknowledged records
    #[serde(default)]
    pub unacknowledged: bool,
}

/// A page of records drained from a log
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordListResponse {
    pub records: Vec<EventRecord>,
    /// Cursor to pass to fetch the next page
    pub next_cursor: u64,
    pub first_id: u64,
    pub last_id: u64,
    pub unacknowledged: u64,
}

pub(super) async fn drain_page(log: &EventLog, query: LogQuery) -> RecordListResponse {
    let cursor = query.cursor.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let filter = if query.unacknowledged {
        AckFilter::Unacknowledged
    } else {
        AckFilter::All
    };

    let (records, stats) = log.drain_with_stats(cursor, limit, filter).await;
    let next_cursor = records.last().map_or(cursor, |record| record.id);

    RecordListResponse {
        records,
        next_cursor,
        first_id: stats.first_id,
        last_id: stats.last_id,
        unacknowledged: stats.unacknowledged,
    }
}
