//! WebSocket protocol message types
//!
//! The stream is server-to-client only. Every frame is one JSON object with
//! a `type` discriminator and a `payload`:
//!
//! ```json
//! {"type":"UnackNumber","payload":3}
//! {"type":"UnackAlarm","payload":{"id":7,"created_at":"...","kind":"ClusterEvent",...}}
//! ```

use serde::{Deserialize, Serialize};
use skyline_events::{EventRecord, SubscriptionEvent};

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Current number of unacknowledged records in the log
    UnackNumber(u64),
    /// A record delivered to the subscriber
    UnackAlarm(EventRecord),
}

impl From<SubscriptionEvent> for ServerMessage {
    fn from(event: SubscriptionEvent) -> Self {
        match event {
            SubscriptionEvent::UnacknowledgedCount(count) => Self::UnackNumber(count),
            SubscriptionEvent::Record(record) => Self::UnackAlarm(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyline_events::{EventLog, LogConfig, RecordDraft};

    #[test]
    fn count_serializes_with_type_and_payload() {
        let json = serde_json::to_string(&ServerMessage::UnackNumber(3)).unwrap();
        assert_eq!(json, r#"{"type":"UnackNumber","payload":3}"#);
    }

    #[tokio::test]
    async fn record_payload_is_flat() {
        let record = EventLog::new("prod", LogConfig::default())
            .append(
                RecordDraft::cluster_event("prod", "Pod")
                    .with_namespace("shop")
                    .with_name("web-0")
                    .with_reason("FailedScheduling"),
            )
            .await
            .unwrap()
            .unwrap();

        let value = serde_json::to_value(ServerMessage::UnackAlarm(record.clone())).unwrap();
        assert_eq!(value["type"], "UnackAlarm");
        assert_eq!(value["payload"]["id"], 1);
        assert_eq!(value["payload"]["namespace"], "shop");
        assert_eq!(value["payload"]["acknowledged"], false);

        let parsed: ServerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ServerMessage::UnackAlarm(record));
    }

    #[test]
    fn converts_subscription_events() {
        assert_eq!(
            ServerMessage::from(SubscriptionEvent::UnacknowledgedCount(2)),
            ServerMessage::UnackNumber(2)
        );
    }
}
