//! Application alarm endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use skyline_events::RecordDraft;
use tracing::debug;

use super::ApiError;
use super::api::{LogQuery, RecordListResponse, drain_page};
use crate::AppState;

/// Body of POST /api/alarms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaiseAlarmRequest {
    /// Kind of object the alarm is about (e.g. `Node`)
    pub kind_name: String,
    pub name: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl From<RaiseAlarmRequest> for RecordDraft {
    fn from(req: RaiseAlarmRequest) -> Self {
        RecordDraft::alarm(req.kind_name)
            .with_cluster(req.cluster)
            .with_namespace(req.namespace)
            .with_name(req.name)
            .with_reason(req.reason)
            .with_message(req.message)
    }
}

/// GET /api/alarms
pub async fn list_alarms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Json<RecordListResponse> {
    Json(drain_page(&state.alarms, query).await)
}

/// POST /api/alarms
pub async fn raise_alarm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RaiseAlarmRequest>,
) -> Result<Response, ApiError> {
    if req.kind_name.is_empty() || req.name.is_empty() {
        return Err(ApiError::bad_request("kind_name and name are required"));
    }

    match state.alarms.append(req.into()).await? {
        Some(record) => Ok((StatusCode::CREATED, Json(record)).into_response()),
        None => {
            debug!("Alarm suppressed as a repeat");
            Ok(Json(serde_json::json!({ "suppressed": true })).into_response())
        }
    }
}

/// PATCH /api/alarms/:id
pub async fn acknowledge_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.alarms.acknowledge(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
