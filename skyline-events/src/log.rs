//! The bounded, persistent, multi-subscriber event log.
//!
//! One [`EventLog`] exists per logical stream: one per managed cluster plus
//! one global log for application alarms. Every log owns:
//!
//! - an id-ordered ring buffer of retained [`EventRecord`]s,
//! - the id sequence (`first_id` is the oldest retained id, `last_id` the
//!   newest assigned one),
//! - the unacknowledged counter,
//! - a backing [`Table`] that every mutation is written to first.
//!
//! All shared state sits behind a single `RwLock`. Mutations take the write
//! lock, persist, mutate, then wake every blocked subscription through a
//! shared `Notify` before the lock is released. Drains take the read lock
//! only long enough to copy a batch out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::{EvictionPolicy, LogConfig};
use crate::error::{Error, Result};
use crate::record::{DedupKey, EventRecord, RecordDraft};
use crate::scanner::CursorScanner;
use crate::store::{MemoryTable, StoreError, StoreResult, Table, Transaction};
use crate::subscription::{StartPosition, Subscription, SubscriptionConfig};

/// Which records a drain returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckFilter {
    /// Every record in id order.
    #[default]
    All,
    /// Only records not yet acknowledged.
    Unacknowledged,
}

impl AckFilter {
    pub fn admits(&self, record: &EventRecord) -> bool {
        match self {
            Self::All => true,
            Self::Unacknowledged => !record.acknowledged,
        }
    }
}

/// Point-in-time view of a log's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub first_id: u64,
    pub last_id: u64,
    pub retained: usize,
    pub unacknowledged: u64,
}

/// Mutable state guarded by the log lock.
struct LogState {
    records: VecDeque<EventRecord>,
    first_id: u64,
    last_id: u64,
    unacknowledged: u64,
    /// Tuple of the most recently appended record.
    last_key: Option<DedupKey>,
    closed: bool,
}

impl LogState {
    fn empty() -> Self {
        Self {
            records: VecDeque::new(),
            first_id: 1,
            last_id: 0,
            unacknowledged: 0,
            last_key: None,
            closed: false,
        }
    }

    /// `first_id` is the oldest retained id, or `last_id + 1` when empty.
    fn refresh_first_id(&mut self) {
        self.first_id = self
            .records
            .front()
            .map_or(self.last_id + 1, |record| record.id);
    }

    fn index_of(&self, id: u64) -> Option<usize> {
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }

    fn stats(&self) -> LogStats {
        LogStats {
            first_id: self.first_id,
            last_id: self.last_id,
            retained: self.records.len(),
            unacknowledged: self.unacknowledged,
        }
    }
}

/// Table key holding the [`HighWater`] mark. Never a valid record id.
const HIGH_WATER_KEY: &str = "high_water";

/// Newest assigned id and its dedup tuple, stored next to the records so
/// that neither is lost when every record has been evicted.
#[derive(Debug, Serialize, Deserialize)]
struct HighWater {
    last_id: u64,
    last_key: DedupKey,
}

/// A single write against the backing table.
enum Mutation {
    /// A new record plus the encoded high-water mark it advances to.
    Add(u64, Vec<u8>, Vec<u8>),
    Update(u64, Vec<u8>),
    Delete(u64),
}

/// State shared between a log handle and its subscription tasks.
pub(crate) struct Shared {
    name: String,
    config: LogConfig,
    table: Arc<dyn Table>,
    state: RwLock<LogState>,
    notify: Notify,
    /// Parent of every subscription's stop token.
    stop: CancellationToken,
    tasks: TaskTracker,
    next_subscriber: AtomicU64,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.notify
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Copy out up to `max_batch` records after `cursor`, together with the
    /// unacknowledged count, in one read-locked critical section.
    pub(crate) async fn read_batch(
        &self,
        cursor: u64,
        max_batch: usize,
        filter: AckFilter,
    ) -> (Vec<EventRecord>, u64) {
        let state = self.state.read().await;
        let batch = self.batch_from(&state, cursor, max_batch, filter);
        (batch, state.unacknowledged)
    }

    fn batch_from(
        &self,
        state: &LogState,
        cursor: u64,
        max_batch: usize,
        filter: AckFilter,
    ) -> Vec<EventRecord> {
        match CursorScanner::locate(&state.records, cursor, state.first_id, state.last_id) {
            Some(position) => {
                trace!(
                    log = %self.name,
                    cursor,
                    direction = ?position.direction,
                    steps = position.steps,
                    "Located cursor"
                );
                state
                    .records
                    .range(position.index..)
                    .filter(|record| filter.admits(record))
                    .take(max_batch)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    async fn persist(&self, mutation: Mutation) -> StoreResult<()> {
        let mut tx = self.table.begin().await?;
        let staged = match mutation {
            Mutation::Add(id, bytes, mark) => match tx.add(&id.to_string(), bytes).await {
                Ok(()) => tx.put(HIGH_WATER_KEY, mark).await,
                Err(e) => Err(e),
            },
            Mutation::Update(id, bytes) => tx.update(&id.to_string(), bytes).await,
            Mutation::Delete(id) => tx.delete(&id.to_string()).await,
        };
        if let Err(e) = staged {
            if let Err(rollback) = tx.rollback().await {
                warn!(log = %self.name, error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
        tx.commit().await
    }

    fn persistence_error(&self, operation: &str, id: u64, source: StoreError) -> Error {
        error!(log = %self.name, id, operation, error = %source, "Persistence failure, operation aborted");
        Error::Persistence {
            log: self.name.clone(),
            source,
        }
    }

    /// Remove the oldest record. Returns false if nothing was evicted.
    async fn evict_front(&self, state: &mut LogState) -> bool {
        let Some(id) = state.records.front().map(|record| record.id) else {
            return false;
        };

        if let Err(source) = self.persist(Mutation::Delete(id)).await {
            warn!(log = %self.name, id, error = %source, "Eviction failed, record kept");
            return false;
        }

        if let Some(record) = state.records.pop_front()
            && !record.acknowledged
        {
            state.unacknowledged = state.unacknowledged.saturating_sub(1);
        }
        state.refresh_first_id();
        trace!(log = %self.name, id, first_id = state.first_id, "Evicted record");
        true
    }

    /// Apply the eviction policy. Returns the number of records evicted.
    async fn enforce_retention(&self, state: &mut LogState, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        match self.config.eviction {
            EvictionPolicy::Capacity(capacity) => {
                while state.records.len() > capacity {
                    if !self.evict_front(state).await {
                        break;
                    }
                    evicted += 1;
                }
            }
            EvictionPolicy::RetentionAge(age) => {
                let Some(cutoff) = chrono::Duration::from_std(age)
                    .ok()
                    .and_then(|age| now.checked_sub_signed(age))
                else {
                    return 0;
                };
                while state
                    .records
                    .front()
                    .is_some_and(|record| record.created_at < cutoff)
                {
                    if !self.evict_front(state).await {
                        break;
                    }
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

/// Handle to an event log. Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct EventLog {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("name", &self.shared.name)
            .field("eviction", &self.shared.config.eviction)
            .finish()
    }
}

impl EventLog {
    /// Create an empty log backed by a fresh in-memory table.
    #[must_use]
    pub fn new(name: impl Into<String>, config: LogConfig) -> Self {
        Self::from_parts(
            name.into(),
            config,
            Arc::new(MemoryTable::new()),
            LogState::empty(),
        )
    }

    /// Open a log over `table`, rehydrating whatever it already holds.
    ///
    /// Undecodable rows are skipped with a warning. The eviction policy is
    /// applied once after loading.
    pub async fn open(
        name: impl Into<String>,
        config: LogConfig,
        table: Arc<dyn Table>,
    ) -> Result<Self> {
        let name = name.into();

        let mut tx = table.begin().await?;
        let rows = tx.list().await?;
        tx.rollback().await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut high_water = None;
        for (key, bytes) in rows {
            if key == HIGH_WATER_KEY {
                match serde_json::from_slice::<HighWater>(&bytes) {
                    Ok(mark) => high_water = Some(mark),
                    Err(e) => warn!(log = %name, error = %e, "Ignoring undecodable high-water mark"),
                }
                continue;
            }
            match serde_json::from_slice::<EventRecord>(&bytes) {
                Ok(record) if record.id.to_string() == key => records.push(record),
                Ok(record) => {
                    warn!(log = %name, key = %key, id = record.id, "Skipping record stored under a foreign key");
                }
                Err(e) => {
                    warn!(log = %name, key = %key, error = %e, "Skipping undecodable record");
                }
            }
        }
        records.sort_by_key(|record| record.id);

        let newest = records.last().map(|record| (record.id, record.dedup_key()));
        let (last_id, last_key) = match (high_water, newest) {
            (Some(mark), Some((id, _))) if mark.last_id >= id => (mark.last_id, Some(mark.last_key)),
            (_, Some((id, key))) => (id, Some(key)),
            (Some(mark), None) => (mark.last_id, Some(mark.last_key)),
            (None, None) => (0, None),
        };

        let mut state = LogState::empty();
        state.last_id = last_id;
        state.last_key = last_key;
        state.unacknowledged = records.iter().filter(|r| !r.acknowledged).count() as u64;
        state.records = records.into();
        state.refresh_first_id();

        let log = Self::from_parts(name, config, table, state);
        let stats = {
            let mut state = log.shared.state.write().await;
            log.shared.enforce_retention(&mut state, Utc::now()).await;
            state.stats()
        };

        info!(
            log = %log.shared.name,
            retained = stats.retained,
            last_id = stats.last_id,
            unacknowledged = stats.unacknowledged,
            "Opened event log"
        );
        Ok(log)
    }

    fn from_parts(name: String, config: LogConfig, table: Arc<dyn Table>, state: LogState) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                config,
                table,
                state: RwLock::new(state),
                notify: Notify::new(),
                stop: CancellationToken::new(),
                tasks: TaskTracker::new(),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &LogConfig {
        &self.shared.config
    }

    /// Append a candidate record.
    ///
    /// Returns `Ok(None)` when the candidate repeats the most recently
    /// appended record; no id is consumed in that case. On a persistence
    /// failure nothing in memory changes.
    pub async fn append(&self, draft: RecordDraft) -> Result<Option<EventRecord>> {
        let draft = draft.normalized();
        let key = draft.dedup_key();

        let mut state = self.shared.state.write().await;
        if state.closed {
            return Err(Error::Closed(self.shared.name.clone()));
        }
        if state.last_key.as_ref() == Some(&key) {
            debug!(log = %self.shared.name, last_id = state.last_id, "Suppressed repeated event");
            return Ok(None);
        }

        let id = state.last_id + 1;
        let record = EventRecord::from_draft(id, Utc::now(), draft);
        let bytes = serde_json::to_vec(&record)?;
        let mark = serde_json::to_vec(&HighWater {
            last_id: id,
            last_key: key.clone(),
        })?;
        if let Err(source) = self.shared.persist(Mutation::Add(id, bytes, mark)).await {
            return Err(self.shared.persistence_error("append", id, source));
        }

        state.last_id = id;
        state.records.push_back(record.clone());
        state.refresh_first_id();
        state.unacknowledged += 1;
        state.last_key = Some(key);

        let evicted = self
            .shared
            .enforce_retention(&mut state, record.created_at)
            .await;

        debug!(
            log = %self.shared.name,
            id,
            evicted,
            unacknowledged = state.unacknowledged,
            "Appended record"
        );
        self.shared.notify.notify_waiters();
        Ok(Some(record))
    }

    /// Mark a record acknowledged. Acknowledging twice is a no-op.
    pub async fn acknowledge(&self, id: u64) -> Result<()> {
        let mut state = self.shared.state.write().await;
        if state.closed {
            return Err(Error::Closed(self.shared.name.clone()));
        }
        let Some(index) = state.index_of(id) else {
            return Err(Error::NotFound(id));
        };
        if state.records[index].acknowledged {
            return Ok(());
        }

        let mut updated = state.records[index].clone();
        updated.acknowledged = true;
        let bytes = serde_json::to_vec(&updated)?;
        if let Err(source) = self.shared.persist(Mutation::Update(id, bytes)).await {
            return Err(self.shared.persistence_error("acknowledge", id, source));
        }

        state.records[index] = updated;
        state.unacknowledged = state.unacknowledged.saturating_sub(1);

        debug!(log = %self.shared.name, id, unacknowledged = state.unacknowledged, "Acknowledged record");
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Up to `max_batch` records with `id > cursor`, in id order.
    ///
    /// A cursor older than `first_id` resumes at `first_id`; the records in
    /// between were evicted and are skipped.
    pub async fn drain(&self, cursor: u64, max_batch: usize, filter: AckFilter) -> Vec<EventRecord> {
        self.shared.read_batch(cursor, max_batch, filter).await.0
    }

    /// [`EventLog::drain`] plus the log's stats, read under the same lock so
    /// the two agree.
    pub async fn drain_with_stats(
        &self,
        cursor: u64,
        max_batch: usize,
        filter: AckFilter,
    ) -> (Vec<EventRecord>, LogStats) {
        let state = self.shared.state.read().await;
        let batch = self.shared.batch_from(&state, cursor, max_batch, filter);
        (batch, state.stats())
    }

    /// Run the eviction policy outside of an append. Returns records evicted.
    pub async fn evict_expired(&self) -> usize {
        let mut state = self.shared.state.write().await;
        if state.closed {
            return 0;
        }
        let evicted = self.shared.enforce_retention(&mut state, Utc::now()).await;
        if evicted > 0 {
            debug!(log = %self.shared.name, evicted, first_id = state.first_id, "Evicted expired records");
            self.shared.notify.notify_waiters();
        }
        evicted
    }

    pub async fn get(&self, id: u64) -> Option<EventRecord> {
        let state = self.shared.state.read().await;
        state.index_of(id).map(|index| state.records[index].clone())
    }

    pub async fn stats(&self) -> LogStats {
        self.shared.state.read().await.stats()
    }

    pub async fn unacknowledged_count(&self) -> u64 {
        self.shared.state.read().await.unacknowledged
    }

    pub async fn len(&self) -> usize {
        self.shared.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.state.read().await.records.is_empty()
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.state.read().await.closed
    }

    /// Start a subscription with its own delivery task.
    pub async fn subscribe(&self, config: SubscriptionConfig) -> Result<Subscription> {
        let cursor = {
            let state = self.shared.state.read().await;
            if state.closed {
                return Err(Error::Closed(self.shared.name.clone()));
            }
            match config.start {
                StartPosition::Beginning => 0,
                StartPosition::End => state.last_id,
                StartPosition::After(cursor) => cursor,
            }
        };

        let id = self.shared.next_subscriber.fetch_add(1, Ordering::SeqCst) + 1;
        let batch_size = config
            .batch_size
            .unwrap_or(self.shared.config.batch_size)
            .max(1);
        let buffer = config
            .buffer
            .unwrap_or(self.shared.config.subscriber_buffer);

        debug!(log = %self.shared.name, subscriber = id, cursor, "Subscribing");
        Ok(Subscription::spawn(
            Arc::clone(&self.shared),
            id,
            cursor,
            config.filter,
            config.counts,
            batch_size,
            buffer,
        ))
    }

    /// Tear the log down: stop every subscription and wait for each delivery
    /// task to finish. Later mutations fail with [`Error::Closed`].
    pub async fn close(&self) {
        self.shared.state.write().await.closed = true;
        self.shared.stop.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        info!(log = %self.shared.name, "Closed event log");
    }
}
