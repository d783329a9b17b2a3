//! Transactional key/value tables backing the event logs.
//!
//! A log persists each record under its stringified id. The log only needs the
//! small capability set below; the real storage engine is expected to provide
//! it, and two implementations ship here: [`MemoryTable`] and [`FileTable`].
//!
//! Transactions stage writes only. Reads go through to the committed rows, so
//! beginning a transaction costs nothing regardless of table size.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors raised by a table.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("key not found: {0}")]
    KeyMissing(String),

    #[error("table unavailable: {0}")]
    Unavailable(String),

    #[error("value for key {0} is not valid UTF-8")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for table operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A table that hands out transactions.
#[async_trait]
pub trait Table: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// A unit of work against a [`Table`].
///
/// Reads observe the committed rows plus this transaction's own writes.
/// Nothing is visible to other transactions until `commit`.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert a new key; fails if it exists.
    async fn add(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Replace an existing key; fails if it is missing.
    async fn update(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Remove an existing key; fails if it is missing.
    async fn delete(&mut self, key: &str) -> StoreResult<()>;

    /// Insert or replace `key`.
    async fn put(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        if self.get(key).await?.is_some() {
            self.update(key, value).await
        } else {
            self.add(key, value).await
        }
    }

    async fn list(&mut self) -> StoreResult<BTreeMap<String, Vec<u8>>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Opens one table per named log.
#[async_trait]
pub trait TableProvider: Send + Sync {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Table>>;
}

type Rows = BTreeMap<String, Vec<u8>>;

/// A pending write inside a transaction.
#[derive(Debug, Clone)]
enum Write {
    Put(Vec<u8>),
    Delete,
}

/// Write set shared by both table implementations, overlaid on the
/// committed rows passed to each call.
#[derive(Default)]
struct Staged {
    writes: BTreeMap<String, Write>,
}

impl Staged {
    fn get<'a>(&'a self, committed: &'a Rows, key: &str) -> Option<&'a Vec<u8>> {
        match self.writes.get(key) {
            Some(Write::Put(value)) => Some(value),
            Some(Write::Delete) => None,
            None => committed.get(key),
        }
    }

    fn add(&mut self, committed: &Rows, key: &str, value: Vec<u8>) -> StoreResult<()> {
        if self.get(committed, key).is_some() {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        self.writes.insert(key.to_string(), Write::Put(value));
        Ok(())
    }

    fn update(&mut self, committed: &Rows, key: &str, value: Vec<u8>) -> StoreResult<()> {
        if self.get(committed, key).is_none() {
            return Err(StoreError::KeyMissing(key.to_string()));
        }
        self.writes.insert(key.to_string(), Write::Put(value));
        Ok(())
    }

    fn delete(&mut self, committed: &Rows, key: &str) -> StoreResult<()> {
        if self.get(committed, key).is_none() {
            return Err(StoreError::KeyMissing(key.to_string()));
        }
        self.writes.insert(key.to_string(), Write::Delete);
        Ok(())
    }

    fn list(&self, committed: &Rows) -> Rows {
        let mut merged = committed.clone();
        for (key, write) in &self.writes {
            match write {
                Write::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                Write::Delete => {
                    merged.remove(key);
                }
            }
        }
        merged
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn apply(self, target: &mut Rows) {
        for (key, write) in self.writes {
            match write {
                Write::Put(value) => {
                    target.insert(key, value);
                }
                Write::Delete => {
                    target.remove(&key);
                }
            }
        }
    }
}

/// In-memory table.
///
/// Used for tests and for deployments that do not need durability.
#[derive(Default)]
pub struct MemoryTable {
    rows: Arc<Mutex<Rows>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unavailable backend: every commit fails while set.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of committed rows.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl Table for MemoryTable {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            rows: Arc::clone(&self.rows),
            fail_commits: Arc::clone(&self.fail_commits),
            staged: Staged::default(),
        }))
    }
}

struct MemoryTransaction {
    rows: Arc<Mutex<Rows>>,
    fail_commits: Arc<AtomicBool>,
    staged: Staged,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let rows = self.rows.lock().await;
        Ok(self.staged.get(&rows, key).cloned())
    }

    async fn add(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let rows = self.rows.lock().await;
        self.staged.add(&rows, key, value)
    }

    async fn update(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let rows = self.rows.lock().await;
        self.staged.update(&rows, key, value)
    }

    async fn delete(&mut self, key: &str) -> StoreResult<()> {
        let rows = self.rows.lock().await;
        self.staged.delete(&rows, key)
    }

    async fn list(&mut self) -> StoreResult<Rows> {
        let rows = self.rows.lock().await;
        Ok(self.staged.list(&rows))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            rows,
            fail_commits,
            staged,
        } = *self;
        if fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        let mut rows = rows.lock().await;
        staged.apply(&mut rows);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Journal entries written before the journal is considered for compaction.
pub const DEFAULT_COMPACT_AFTER: usize = 1024;

/// One committed write in a file table's journal.
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    key: String,
    /// New value; absent for a delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

struct FileState {
    rows: Rows,
    journal: Option<fs::File>,
    journal_bytes: u64,
    journal_entries: usize,
}

struct FileInner {
    path: PathBuf,
    journal_path: PathBuf,
    compact_after: usize,
    state: Mutex<FileState>,
}

/// Table persisted as a JSON snapshot plus an append-only JSON-lines journal.
///
/// Values must be UTF-8 (records are stored as JSON text). A commit appends
/// one journal line per write. Once the journal holds at least
/// `compact_after` entries and twice as many entries as there are rows, it is
/// folded into the snapshot (written through a temp file and rename) and
/// truncated.
pub struct FileTable {
    inner: Arc<FileInner>,
}

impl FileTable {
    /// Load the table at `path`, or start empty if nothing is stored there.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with(path, DEFAULT_COMPACT_AFTER).await
    }

    /// Like [`FileTable::open`] with a custom compaction threshold.
    pub async fn open_with(path: impl Into<PathBuf>, compact_after: usize) -> StoreResult<Self> {
        let path = path.into();
        let journal_path = path.with_extension("jsonl");

        let mut rows = read_snapshot(&path).await?;
        let replayed = replay_journal(&journal_path, &mut rows).await?;

        let table = Self {
            inner: Arc::new(FileInner {
                path,
                journal_path,
                compact_after: compact_after.max(1),
                state: Mutex::new(FileState {
                    rows,
                    journal: None,
                    journal_bytes: 0,
                    journal_entries: 0,
                }),
            }),
        };

        {
            let mut state = table.inner.state.lock().await;
            // Start every session on a clean journal.
            if replayed {
                table.inner.compact(&mut state).await?;
            }
            debug!(path = %table.inner.path.display(), rows = state.rows.len(), "Opened file table");
        }

        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.inner.journal_path
    }
}

async fn read_snapshot(path: &Path) -> StoreResult<Rows> {
    match fs::read_to_string(path).await {
        Ok(content) => {
            let doc: BTreeMap<String, String> = serde_json::from_str(&content)?;
            Ok(doc
                .into_iter()
                .map(|(key, value)| (key, value.into_bytes()))
                .collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Rows::new()),
        Err(e) => Err(e.into()),
    }
}

/// Apply the journal at `path` to `rows`. Returns whether the journal held
/// anything at all.
///
/// Replay stops at the first unreadable line; a torn tail from an interrupted
/// write is dropped.
async fn replay_journal(path: &Path, rows: &mut Rows) -> StoreResult<bool> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let content = String::from_utf8_lossy(&bytes);
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(JournalEntry {
                key,
                value: Some(value),
            }) => {
                rows.insert(key, value.into_bytes());
            }
            Ok(JournalEntry { key, value: None }) => {
                rows.remove(&key);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Stopping journal replay at unreadable entry"
                );
                break;
            }
        }
    }
    Ok(!bytes.is_empty())
}

impl FileInner {
    async fn open_journal(&self, state: &mut FileState) -> StoreResult<fs::File> {
        if let Some(parent) = self.journal_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        state.journal_bytes = file.metadata().await?.len();
        Ok(file)
    }

    async fn append_journal(&self, state: &mut FileState, bytes: &[u8]) -> StoreResult<()> {
        let mut file = match state.journal.take() {
            Some(file) => file,
            None => self.open_journal(state).await?,
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                state.journal_bytes += bytes.len() as u64;
                state.journal = Some(file);
                Ok(())
            }
            Err(e) => {
                // Cut the partial entry so later appends stay readable.
                if let Err(truncate) = file.set_len(state.journal_bytes).await {
                    warn!(
                        path = %self.journal_path.display(),
                        error = %truncate,
                        "Failed to truncate journal after a failed write"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Fold the journal into the snapshot and truncate it.
    async fn compact(&self, state: &mut FileState) -> StoreResult<()> {
        let mut doc = BTreeMap::new();
        for (key, value) in &state.rows {
            let text =
                std::str::from_utf8(value).map_err(|_| StoreError::Encoding(key.clone()))?;
            doc.insert(key.as_str(), text);
        }
        let content = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        state.journal = None;
        fs::write(&self.journal_path, b"").await?;
        state.journal_bytes = 0;
        state.journal_entries = 0;

        debug!(path = %self.path.display(), rows = state.rows.len(), "Compacted file table");
        Ok(())
    }

    fn should_compact(&self, state: &FileState) -> bool {
        state.journal_entries >= self.compact_after
            && state.journal_entries >= state.rows.len().saturating_mul(2)
    }
}

#[async_trait]
impl Table for FileTable {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(FileTransaction {
            inner: Arc::clone(&self.inner),
            staged: Staged::default(),
        }))
    }
}

struct FileTransaction {
    inner: Arc<FileInner>,
    staged: Staged,
}

impl FileTransaction {
    fn encode_journal(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        for (key, write) in &self.staged.writes {
            let value = match write {
                Write::Put(value) => Some(
                    String::from_utf8(value.clone())
                        .map_err(|_| StoreError::Encoding(key.clone()))?,
                ),
                Write::Delete => None,
            };
            serde_json::to_writer(
                &mut buf,
                &JournalEntry {
                    key: key.clone(),
                    value,
                },
            )?;
            buf.push(b'\n');
        }
        Ok(buf)
    }
}

#[async_trait]
impl Transaction for FileTransaction {
    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.inner.state.lock().await;
        Ok(self.staged.get(&state.rows, key).cloned())
    }

    async fn add(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let state = self.inner.state.lock().await;
        self.staged.add(&state.rows, key, value)
    }

    async fn update(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let state = self.inner.state.lock().await;
        self.staged.update(&state.rows, key, value)
    }

    async fn delete(&mut self, key: &str) -> StoreResult<()> {
        let state = self.inner.state.lock().await;
        self.staged.delete(&state.rows, key)
    }

    async fn list(&mut self) -> StoreResult<Rows> {
        let state = self.inner.state.lock().await;
        Ok(self.staged.list(&state.rows))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let entry = self.encode_journal()?;
        let Self { inner, staged } = *self;

        let mut state = inner.state.lock().await;
        // Only publish the new rows once they are on disk.
        inner.append_journal(&mut state, &entry).await?;
        state.journal_entries += staged.len();
        staged.apply(&mut state.rows);

        if inner.should_compact(&state)
            && let Err(e) = inner.compact(&mut state).await
        {
            warn!(path = %inner.path.display(), error = %e, "Journal compaction failed");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Hands out [`MemoryTable`]s, one per name.
///
/// Re-opening a name returns the same table, so a log re-created under the
/// same name rehydrates what the previous instance stored.
#[derive(Default)]
pub struct MemoryTables {
    tables: Mutex<HashMap<String, Arc<MemoryTable>>>,
}

impl MemoryTables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete table for `name`, creating it if needed.
    pub async fn table(&self, name: &str) -> Arc<MemoryTable> {
        let mut tables = self.tables.lock().await;
        Arc::clone(tables.entry(name.to_string()).or_default())
    }
}

#[async_trait]
impl TableProvider for MemoryTables {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Table>> {
        let table: Arc<dyn Table> = self.table(name).await;
        Ok(table)
    }
}

/// Hands out [`FileTable`]s stored under a directory.
pub struct FileTables {
    dir: PathBuf,
}

impl FileTables {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot file backing the table called `name`.
    ///
    /// Names made only of ASCII letters, digits, `-` and `.` (not leading)
    /// are used as they are. Any other name is hex encoded behind a `_`
    /// prefix, which plain names cannot contain, so distinct names never
    /// share a file.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        let stem = if plain {
            name.to_string()
        } else {
            format!("_{}", hex::encode(name))
        };
        self.dir.join(format!("{stem}.json"))
    }
}

#[async_trait]
impl TableProvider for FileTables {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Table>> {
        let table = FileTable::open(self.path_for(name)).await?;
        Ok(Arc::new(table))
    }
}
