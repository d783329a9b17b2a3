//! Stream gateway: bridges one log subscription to one WebSocket.
//!
//! On connect the client receives the current unacknowledged count, then
//! every record and count change the subscription produces. The connection
//! ends when the subscription closes, the client goes away or a write fails;
//! in every case the subscription is stopped before the socket is closed.

use std::sync::Arc;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use skyline_events::{EventLog, StartPosition, SubscriptionConfig};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use crate::AppState;
use crate::http::ApiError;

/// Query parameters for cluster event streams
#[derive(Debug, Default, Deserialize)]
pub struct ClusterStreamQuery {
    /// Replay records after this id (default: everything retained)
    #[serde(default)]
    pub cursor: Option<u64>,
}

/// GET /ws/alarms - live stream of unacknowledged application alarms
pub async fn alarm_stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let log = state.alarms.clone();
    ws.on_upgrade(move |socket| stream_log(socket, log, SubscriptionConfig::live()))
}

/// GET /ws/clusters/:name/events - replay and follow a cluster's events
pub async fn cluster_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ClusterStreamQuery>,
) -> Response {
    let log = match state.clusters.get(&name).await {
        Ok(log) => log,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let config = SubscriptionConfig::replay()
        .with_start(StartPosition::After(query.cursor.unwrap_or(0)))
        .with_counts(true);
    ws.on_upgrade(move |socket| stream_log(socket, log, config))
}

/// Forward a subscription on `log` to `socket` until either side ends.
pub async fn stream_log(socket: WebSocket, log: EventLog, config: SubscriptionConfig) {
    let connection = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = match log.subscribe(config.with_counts(true)).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(connection = %connection, log = %log.name(), error = %e, "Cannot subscribe");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        connection = %connection,
        log = %log.name(),
        subscriber = subscription.id(),
        "Stream client connected"
    );

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection = %connection, "Stream client closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {} // Inbound frames carry no meaning
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "Stream transport failure");
                        break;
                    }
                }
            }

            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_json(&mut sender, &ServerMessage::from(event)).await {
                            warn!(connection = %connection, error = %e, "Stream send failed");
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection, "Subscription closed");
                        break;
                    }
                }
            }
        }
    }

    subscription.stop().await;
    let _ = sender.send(Message::Close(None)).await;

    info!(
        connection = %connection,
        log = %log.name(),
        cursor = subscription.cursor(),
        "Stream client disconnected"
    );
}

async fn send_json<S, T>(sender: &mut S, msg: &T) -> Result<(), String>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
    T: Serialize,
{
    let json = serde_json::to_string(msg).map_err(|e| format!("Serialize error: {}", e))?;
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| format!("Send error: {}", e))
}
