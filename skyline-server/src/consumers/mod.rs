//! Background tasks that read from or maintain the event logs.
//!
//! The `ConsumerManager` owns every long-running task the server starts
//! outside request handling:
//!
//! ```text
//!   alarm log ──subscription──▶ notification consumer ──▶ Notifier
//!   alarm log + cluster logs ◀── retention sweeper (every sweep_interval)
//! ```
//!
//! All tasks share one cancellation token and stop on `shutdown`.

pub mod notification;
pub mod retention;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use skyline_events::{EventLog, EventRecord, SubscriptionConfig, SubscriptionEvent};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Type alias for async record handlers.
pub type RecordHandler =
    Arc<dyn Fn(EventRecord) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for async unacknowledged-count handlers.
pub type CountHandler = Arc<dyn Fn(u64) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Manages background tasks over the event logs.
pub struct ConsumerManager {
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for ConsumerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerManager {
    pub fn new() -> Self {
        Self {
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribe to `log` and run `on_record` / `on_count` for each event.
    ///
    /// The consumer runs until shutdown or until the log is closed.
    pub async fn spawn_consumer(
        &self,
        name: &str,
        log: &EventLog,
        config: SubscriptionConfig,
        on_record: RecordHandler,
        on_count: Option<CountHandler>,
    ) -> skyline_events::Result<()> {
        let mut subscription = log.subscribe(config).await?;
        let shutdown = self.shutdown.clone();
        let name = name.to_string();

        self.tasks.spawn(async move {
            info!(consumer = %name, log = %subscription.log(), "Consumer started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(consumer = %name, "Consumer received shutdown signal");
                        break;
                    }
                    event = subscription.recv() => {
                        match event {
                            Some(SubscriptionEvent::Record(record)) => on_record(record).await,
                            Some(SubscriptionEvent::UnacknowledgedCount(count)) => {
                                if let Some(on_count) = &on_count {
                                    on_count(count).await;
                                }
                            }
                            None => {
                                debug!(consumer = %name, "Subscription closed");
                                break;
                            }
                        }
                    }
                }
            }

            subscription.stop().await;
            info!(consumer = %name, cursor = subscription.cursor(), "Consumer stopped");
        });

        Ok(())
    }

    /// Spawn an arbitrary task that should stop with the manager.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every task to finish after `shutdown`.
    pub async fn wait_for_shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
