//! Per-subscriber delivery tasks.
//!
//! Each [`Subscription`] owns a tokio task that drains its log from a private
//! cursor and pushes records into a bounded channel. A full channel blocks the
//! task, which is how a slow consumer applies backpressure. A caught-up task
//! parks on the log's `Notify` until the next mutation.
//!
//! Stopping is a handshake: the handle cancels the task's token and awaits its
//! `JoinHandle`. The task checks the token before and after every push and
//! while parked, so it exits without delivering further records.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::log::{AckFilter, Shared};
use crate::record::EventRecord;

/// Where a new subscription's cursor starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Replay everything retained.
    #[default]
    Beginning,
    /// Only records appended after subscribing.
    End,
    /// Records with an id greater than this cursor.
    After(u64),
}

/// Options for [`EventLog::subscribe`](crate::EventLog::subscribe).
#[derive(Debug, Clone, Default)]
pub struct SubscriptionConfig {
    pub start: StartPosition,
    pub filter: AckFilter,
    /// Emit the unacknowledged count before each batch whenever it changed.
    pub counts: bool,
    /// Overrides the log's batch size.
    pub batch_size: Option<usize>,
    /// Overrides the log's channel buffer.
    pub buffer: Option<usize>,
}

impl SubscriptionConfig {
    /// Unacknowledged records appended after subscribing, with counts.
    pub fn live() -> Self {
        Self {
            start: StartPosition::End,
            filter: AckFilter::Unacknowledged,
            counts: true,
            ..Self::default()
        }
    }

    /// Every retained record, without counts.
    pub fn replay() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: AckFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_counts(mut self, counts: bool) -> Self {
        self.counts = counts;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, size: usize) -> Self {
        self.buffer = Some(size);
        self
    }
}

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// Current number of unacknowledged records in the log.
    UnacknowledgedCount(u64),
    Record(EventRecord),
}

/// Lifecycle of a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Draining,
    /// Caught up and waiting for the log to change.
    Blocked,
    Stopping,
    Stopped,
}

/// Handle to a running subscription.
///
/// Dropping the handle stops the delivery task without waiting for it.
pub struct Subscription {
    id: u64,
    log: String,
    events: mpsc::Receiver<SubscriptionEvent>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<SubscriptionState>,
    cursor: Arc<AtomicU64>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("log", &self.log)
            .field("cursor", &self.cursor())
            .field("state", &self.state())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        id: u64,
        cursor: u64,
        filter: AckFilter,
        counts: bool,
        batch_size: usize,
        buffer: usize,
    ) -> Self {
        let (tx, events) = mpsc::channel(buffer.max(1));
        let (state_tx, state) = watch::channel(SubscriptionState::Active);
        let stop = shared.stop_token();
        let cursor = Arc::new(AtomicU64::new(cursor));
        let log = shared.name().to_string();

        let delivery = Delivery {
            shared: Arc::clone(&shared),
            id,
            cursor: Arc::clone(&cursor),
            filter,
            counts,
            batch_size,
            tx,
            stop: stop.clone(),
            state: state_tx,
        };
        let task = shared.tasks().spawn(delivery.run());

        Self {
            id,
            log,
            events,
            stop,
            task: Some(task),
            state,
            cursor,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the log this subscription reads.
    pub fn log(&self) -> &str {
        &self.log
    }

    /// Id of the last record handed to the channel.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Next event, or `None` once the subscription has stopped.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Stop delivery and wait for the task to acknowledge.
    ///
    /// Events already buffered in the channel can still be received.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(log = %self.log, subscriber = self.id, error = %e, "Delivery task failed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Delivery {
    shared: Arc<Shared>,
    id: u64,
    cursor: Arc<AtomicU64>,
    filter: AckFilter,
    counts: bool,
    batch_size: usize,
    tx: mpsc::Sender<SubscriptionEvent>,
    stop: CancellationToken,
    state: watch::Sender<SubscriptionState>,
}

impl Delivery {
    async fn run(self) {
        debug!(
            log = %self.shared.name(),
            subscriber = self.id,
            cursor = self.cursor.load(Ordering::SeqCst),
            "Delivery started"
        );

        let mut reported = None;
        'deliver: loop {
            if self.stop.is_cancelled() {
                break;
            }

            // Register for wakeups before reading so a mutation that lands
            // between the read and the park is not missed.
            let notified = self.shared.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.state.send_replace(SubscriptionState::Draining);
            let cursor = self.cursor.load(Ordering::SeqCst);
            let (batch, unacknowledged) = self
                .shared
                .read_batch(cursor, self.batch_size, self.filter)
                .await;

            if self.counts && reported != Some(unacknowledged) {
                if !self
                    .push(SubscriptionEvent::UnacknowledgedCount(unacknowledged))
                    .await
                {
                    break;
                }
                reported = Some(unacknowledged);
            }

            if batch.is_empty() {
                self.state.send_replace(SubscriptionState::Blocked);
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => break,
                    _ = &mut notified => {}
                }
                self.state.send_replace(SubscriptionState::Active);
                continue;
            }

            for record in batch {
                let id = record.id;
                if !self.push(SubscriptionEvent::Record(record)).await {
                    break 'deliver;
                }
                self.cursor.store(id, Ordering::SeqCst);
            }
            self.state.send_replace(SubscriptionState::Active);
        }

        self.state.send_replace(SubscriptionState::Stopping);
        debug!(
            log = %self.shared.name(),
            subscriber = self.id,
            cursor = self.cursor.load(Ordering::SeqCst),
            "Delivery stopped"
        );
        drop(self.tx);
        self.state.send_replace(SubscriptionState::Stopped);
    }

    /// Push one event. Returns false when delivery must end.
    async fn push(&self, event: SubscriptionEvent) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
