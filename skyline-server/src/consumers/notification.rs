//! Notification consumer.
//!
//! Follows the alarm log live and hands every new unacknowledged alarm to a
//! [`Notifier`].

use std::sync::Arc;

use async_trait::async_trait;
use skyline_events::{EventLog, EventRecord, SubscriptionConfig};
use tracing::{info, warn};

use super::{ConsumerManager, CountHandler, RecordHandler};

/// Sink for alarm notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per newly raised alarm.
    async fn notify(&self, record: &EventRecord);

    /// Called whenever the unacknowledged count changes.
    async fn unacknowledged_changed(&self, _count: u64) {}
}

/// Notifier that writes alarms to the tracing log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, record: &EventRecord) {
        warn!(
            id = record.id,
            cluster = %record.cluster,
            kind = %record.kind_name,
            name = %record.name,
            reason = %record.reason,
            message = %record.message,
            "Alarm raised"
        );
    }

    async fn unacknowledged_changed(&self, count: u64) {
        info!(unacknowledged = count, "Unacknowledged alarms");
    }
}

/// Start the notification consumer on the alarm log.
pub async fn start_notification_consumer(
    manager: &ConsumerManager,
    alarms: &EventLog,
    notifier: Arc<dyn Notifier>,
) -> skyline_events::Result<()> {
    let record_notifier = Arc::clone(&notifier);
    let on_record: RecordHandler = Arc::new(move |record| {
        let notifier = Arc::clone(&record_notifier);
        Box::pin(async move {
            notifier.notify(&record).await;
        })
    });
    let on_count: CountHandler = Arc::new(move |count| {
        let notifier = Arc::clone(&notifier);
        Box::pin(async move {
            notifier.unacknowledged_changed(count).await;
        })
    });

    manager
        .spawn_consumer(
            "notifications",
            alarms,
            SubscriptionConfig::live(),
            on_record,
            Some(on_count),
        )
        .await
}
