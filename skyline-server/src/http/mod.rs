//! HTTP server module

mod alarms;
mod api;
mod clusters;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::AppState;
use crate::ws;

pub use alarms::RaiseAlarmRequest;
pub use api::{HealthResponse, LogQuery, RecordListResponse};
pub use clusters::{ClusterListResponse, ClusterSummary, IngestResponse};

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route(
            "/api/alarms",
            get(alarms::list_alarms).post(alarms::raise_alarm),
        )
        .route("/api/alarms/:id", patch(alarms::acknowledge_alarm))
        .route("/api/clusters", get(clusters::list_clusters))
        .route(
            "/api/clusters/:name",
            put(clusters::add_cluster).delete(clusters::remove_cluster),
        )
        .route(
            "/api/clusters/:name/events",
            get(clusters::list_events).post(clusters::ingest_event),
        )
        .route(
            "/api/clusters/:name/events/:id",
            patch(clusters::acknowledge_event),
        )
        .route("/ws/alarms", get(ws::alarm_stream))
        .route("/ws/clusters/:name/events", get(ws::cluster_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// An error a handler turns into a status code and [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", error)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<skyline_events::Error> for ApiError {
    fn from(e: skyline_events::Error) -> Self {
        use skyline_events::Error;

        let (status, code) = match &e {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::UnknownCluster(_) => (StatusCode::NOT_FOUND, "CLUSTER_NOT_FOUND"),
            Error::Persistence { .. } | Error::Storage(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_FAILED")
            }
            Error::Closed(_) => (StatusCode::GONE, "LOG_CLOSED"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
