//! Cluster registration and cluster event endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use skyline_events::{EventLog, EventRecord, RawClusterEvent};

use super::ApiError;
use super::api::{LogQuery, RecordListResponse, drain_page};
use crate::AppState;

/// One registered cluster and its log bookkeeping
#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub name: String,
    pub first_id: u64,
    pub last_id: u64,
    pub retained: usize,
    pub unacknowledged: u64,
}

impl ClusterSummary {
    async fn of(log: &EventLog) -> Self {
        let stats = log.stats().await;
        Self {
            name: log.name().to_string(),
            first_id: stats.first_id,
            last_id: stats.last_id,
            retained: stats.retained,
            unacknowledged: stats.unacknowledged,
        }
    }
}

/// Response for listing clusters
#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterListResponse {
    pub clusters: Vec<ClusterSummary>,
}

/// Outcome of ingesting a raw event
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// False when the event was filtered out or repeated the previous one
    pub admitted: bool,
    pub record: Option<EventRecord>,
}

/// GET /api/clusters
pub async fn list_clusters(State(state): State<Arc<AppState>>) -> Json<ClusterListResponse> {
    let mut clusters = Vec::new();
    for name in state.clusters.clusters().await {
        // A cluster removed mid-listing is skipped.
        if let Ok(log) = state.clusters.get(&name).await {
            clusters.push(ClusterSummary::of(&log).await);
        }
    }
    Json(ClusterListResponse { clusters })
}

/// PUT /api/clusters/:name
pub async fn add_cluster(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ClusterSummary>, ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("cluster name must not be empty"));
    }
    let log = state.clusters.on_cluster_added(&name).await?;
    Ok(Json(ClusterSummary::of(&log).await))
}

/// DELETE /api/clusters/:name
pub async fn remove_cluster(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.clusters.on_cluster_removed(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(skyline_events::Error::UnknownCluster(name).into())
    }
}

/// POST /api/clusters/:name/events
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(event): Json<RawClusterEvent>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let record = state.clusters.ingest(&name, &event).await?;
    let status = if record.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(IngestResponse {
            admitted: record.is_some(),
            record,
        }),
    ))
}

/// GET /api/clusters/:name/events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let log = state.clusters.get(&name).await?;
    Ok(Json(drain_page(&log, query).await))
}

/// PATCH /api/clusters/:name/events/:id
pub async fn acknowledge_event(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    state.clusters.get(&name).await?.acknowledge(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::create_router;
    use axum_test::TestServer;

    async fn server() -> TestServer {
        let state = Arc::new(AppState::new_for_testing().await.unwrap());
        TestServer::new(create_router(state)).unwrap()
    }

    fn failed_scheduling(kind: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "Warning",
            "reason": "FailedScheduling",
            "message": "0/3 nodes are available",
            "involvedObject": {"kind": kind, "name": name, "namespace": "shop"}
        })
    }

    #[tokio::test]
    async fn register_list_and_remove_clusters() {
        let server = server().await;

        server.put("/api/clusters/prod").await.assert_status_ok();
        server.put("/api/clusters/edge").await.assert_status_ok();

        let list: ClusterListResponse = server.get("/api/clusters").await.json();
        let names: Vec<&str> = list.clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["edge", "prod"]);

        server
            .delete("/api/clusters/edge")
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete("/api/clusters/edge")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ingest_admits_only_matching_warnings() {
        let server = server().await;
        server.put("/api/clusters/prod").await;

        let response = server
            .post("/api/clusters/prod/events")
            .json(&failed_scheduling("Pod", "web-0"))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: IngestResponse = response.json();
        assert!(body.admitted);
        assert_eq!(body.record.unwrap().namespace, "shop");

        let response = server
            .post("/api/clusters/prod/events")
            .json(&failed_scheduling("ConfigMap", "settings"))
            .await;
        response.assert_status_ok();
        let body: IngestResponse = response.json();
        assert!(!body.admitted);

        let node: IngestResponse = server
            .post("/api/clusters/prod/events")
            .json(&failed_scheduling("Node", "node-1"))
            .await
            .json();
        assert!(node.record.unwrap().namespace.is_empty());
    }

    #[tokio::test]
    async fn list_and_acknowledge_cluster_events() {
        let server = server().await;
        server.put("/api/clusters/prod").await;
        for name in ["web-0", "web-1"] {
            server
                .post("/api/clusters/prod/events")
                .json(&failed_scheduling("Pod", name))
                .await;
        }

        server
            .patch("/api/clusters/prod/events/1")
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let page: RecordListResponse = server.get("/api/clusters/prod/events").await.json();
        assert_eq!(page.records.len(), 2);
        assert!(page.records[0].acknowledged);
        assert_eq!(page.unacknowledged, 1);
    }

    #[tokio::test]
    async fn unknown_cluster_is_404() {
        let server = server().await;

        let response = server.get("/api/clusters/ghost/events").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], "CLUSTER_NOT_FOUND");

        server
            .post("/api/clusters/ghost/events")
            .json(&failed_scheduling("Pod", "web-0"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
