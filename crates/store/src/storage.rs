//! `Storage`: the shared state every database handle, the collector and the
//! replication producer work through.
//!
//! The engine sits behind a `parking_lot::RwLock`. Reads share it; commits
//! take it exclusively, so batches are applied and published one at a time in
//! sequence order.
//!
//! Read-modify-write operations also hold the writer lock from their first
//! read until their commit, so no other mutation can land in between. Plain
//! reads never take it.
//!
//! Lock order: namespace table, then writer, then engine.

use config::Config;
use engine::{BatchOp, Engine, ScanPage};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::batch::WriteBatch;
use crate::codec::{decode_raw, RawKey, SYSTEM_PREFIX, SYS_NAMESPACE};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, VersionClock};
use crate::namespace::{self, Namespace, NamespaceRecord, NamespaceTable};

/// A batch as it was committed.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub seq: u64,
    pub ops: Arc<Vec<BatchOp>>,
    pub committed_at_ms: u64,
}

/// Sees every committed batch, in sequence order, while the commit lock is
/// held. Implementations must not call back into `Storage`.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, batch: &CommittedBatch);
}

/// One page of the dataset, as served to a resyncing follower.
///
/// Covers every snapshot key in `[start, next)` of the request that produced
/// it. Each page is read under one short read lock; pages of one snapshot may
/// reflect different sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChunk {
    /// Sequence of the last batch this page reflects.
    pub seq: u64,
    pub pairs: Vec<(Vec<u8>, Vec<u8>)>,
    /// Start of the next page, `None` on the last one.
    pub next: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub last_seq: u64,
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    pub l0_tables: usize,
    pub l1_tables: usize,
    pub namespaces: usize,
}

pub struct Storage {
    engine: RwLock<Engine>,
    /// Serializes mutations. Reentrant so one operation may build on another.
    writer: ReentrantMutex<()>,
    namespaces: RwLock<NamespaceTable>,
    clock: VersionClock,
    observers: RwLock<Vec<Arc<dyn CommitObserver>>>,
}

/// Exclusive access to the engine: reads and commits with no other writer
/// in between. Hold it briefly; every reader waits.
pub(crate) struct StorageGuard<'a> {
    storage: &'a Storage,
    engine: RwLockWriteGuard<'a, Engine>,
    _writer: ReentrantMutexGuard<'a, ()>,
}

impl StorageGuard<'_> {
    pub(crate) fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let found = self.engine.get(key).map_err(StoreError::EngineIo)?;
        Ok(found.map(|(_, value)| value))
    }

    pub(crate) fn scan_bounded(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> StoreResult<ScanPage> {
        self.engine
            .scan_bounded(start, end, limit)
            .map_err(StoreError::EngineIo)
    }

    pub(crate) fn commit(&mut self, batch: WriteBatch) -> StoreResult<u64> {
        self.storage.commit_locked(&mut self.engine, batch.into_ops())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces = self.namespaces.read().live();
        f.debug_struct("Storage")
            .field("engine", &*self.engine.read())
            .field("namespaces", &namespaces)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl Storage {
    /// Opens the engine under `cfg.data_dir` and loads the namespace table,
    /// persisting any configured namespace not yet on disk.
    ///
    /// # Errors
    ///
    /// `EngineIo` if recovery fails, `Config` if configured namespaces
    /// conflict with each other or with the persisted table.
    pub fn open(cfg: &Config) -> StoreResult<Self> {
        let engine = Engine::open(cfg).map_err(StoreError::EngineIo)?;
        Self::with_engine(engine, cfg)
    }

    /// Wraps an already opened engine.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Storage::open), minus recovery.
    pub fn with_engine(engine: Engine, cfg: &Config) -> StoreResult<Self> {
        let storage = Storage {
            engine: RwLock::new(engine),
            writer: ReentrantMutex::new(()),
            namespaces: RwLock::new(NamespaceTable::default()),
            clock: VersionClock::new(),
            observers: RwLock::new(Vec::new()),
        };

        let persisted = storage.persisted_namespaces()?;
        let (table, added) = NamespaceTable::merge(persisted, &cfg.namespaces)?;
        *storage.namespaces.write() = table;

        if !added.is_empty() {
            let mut batch = WriteBatch::new();
            for record in &added {
                namespace::persist(&mut batch, record);
            }
            storage.commit(batch)?;
        }

        info!(
            seq = storage.last_seq(),
            namespaces = storage.namespaces.read().live().len(),
            "storage opened"
        );
        Ok(storage)
    }

    fn persisted_namespaces(&self) -> StoreResult<Vec<NamespaceRecord>> {
        let (start, end) = namespace::persisted_range();
        self.scan(&start, &end)?
            .iter()
            .map(|(k, v)| namespace::decode_record(k, v))
            .collect()
    }

    /// Registers an observer for every later commit.
    pub fn add_observer(&self, observer: Arc<dyn CommitObserver>) {
        // taken under the engine lock so no commit slips between
        // registration and the observer's view of `last_seq`
        let _engine = self.engine.write();
        self.observers.write().push(observer);
    }

    /// Registers an observer built from the current sequence, atomically with
    /// respect to commits.
    pub fn add_observer_with<O, F>(&self, build: F) -> Arc<O>
    where
        O: CommitObserver + 'static,
        F: FnOnce(u64) -> O,
    {
        let engine = self.engine.write();
        let observer = Arc::new(build(engine.seq()));
        self.observers.write().push(observer.clone());
        observer
    }

    /// Commits `batch` atomically and returns its sequence number.
    ///
    /// An empty batch commits nothing and returns the current sequence.
    ///
    /// # Errors
    ///
    /// `EngineIo`; nothing from the batch is visible afterwards.
    pub fn commit(&self, batch: WriteBatch) -> StoreResult<u64> {
        let _writer = self.writer.lock();
        let mut engine = self.engine.write();
        self.commit_locked(&mut engine, batch.into_ops())
    }

    /// Holds off every other mutation until the guard drops. Reads made
    /// through `Storage` while holding it see no foreign commits.
    pub(crate) fn writer(&self) -> ReentrantMutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Takes the writer and commit locks. Do not touch the namespace table
    /// while holding it.
    pub(crate) fn lock(&self) -> StorageGuard<'_> {
        let writer = self.writer.lock();
        StorageGuard {
            storage: self,
            engine: self.engine.write(),
            _writer: writer,
        }
    }

    fn commit_locked(&self, engine: &mut Engine, ops: Vec<BatchOp>) -> StoreResult<u64> {
        if ops.is_empty() {
            return Ok(engine.seq());
        }

        let seq = engine.write(&ops).map_err(|e| {
            error!(error = %e, ops = ops.len(), "batch commit failed");
            StoreError::EngineIo(e)
        })?;
        debug!(seq, ops = ops.len(), "committed batch");

        let observers = self.observers.read();
        if !observers.is_empty() {
            let committed = CommittedBatch {
                seq,
                ops: Arc::new(ops),
                committed_at_ms: now_ms(),
            };
            for observer in observers.iter() {
                observer.on_commit(&committed);
            }
        }
        Ok(seq)
    }

    /// # Errors
    ///
    /// `EngineIo` on read failure.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let engine = self.engine.read();
        let found = engine.get(key).map_err(StoreError::EngineIo)?;
        Ok(found.map(|(_, value)| value))
    }

    /// Every live pair in `[start, end)`. An empty `end` is unbounded.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read failure.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.engine
            .read()
            .scan(start, end)
            .map_err(StoreError::EngineIo)
    }

    /// # Errors
    ///
    /// `EngineIo` on read failure.
    pub fn scan_bounded(&self, start: &[u8], end: &[u8], limit: usize) -> StoreResult<ScanPage> {
        self.engine
            .read()
            .scan_bounded(start, end, limit)
            .map_err(StoreError::EngineIo)
    }

    /// Sequence of the last committed batch.
    pub fn last_seq(&self) -> u64 {
        self.engine.read().seq()
    }

    pub fn clock(&self) -> &VersionClock {
        &self.clock
    }

    /// A handle bound to the live namespace `token`.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` for unknown or retired tokens.
    pub fn db(&self, token: &str) -> StoreResult<Database<'_>> {
        let ns = self.namespaces.read().resolve(token)?;
        Ok(Database::new(self, ns))
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        self.namespaces.read().live()
    }

    /// Runs `f` against the namespace table.
    pub fn with_namespaces<T>(&self, f: impl FnOnce(&NamespaceTable) -> T) -> T {
        f(&self.namespaces.read())
    }

    /// Adds a namespace at runtime and persists it.
    ///
    /// # Errors
    ///
    /// `Config` on conflict, `EngineIo` if persisting fails.
    pub fn register_namespace(&self, token: &str, prefix: u16) -> StoreResult<Namespace> {
        let mut table = self.namespaces.write();
        let mut updated = table.clone();
        if updated.register(token, prefix)? {
            let mut batch = WriteBatch::new();
            namespace::persist(
                &mut batch,
                &NamespaceRecord {
                    prefix,
                    token: token.to_string(),
                    retired: false,
                },
            );
            self.commit(batch)?;
            *table = updated;
            info!(token, prefix, "registered namespace");
        }
        table.resolve(token)
    }

    /// Retires `token`. Its data becomes unreachable and is reclaimed by the
    /// orphan collector; its prefix is never reused.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the token is not live, `EngineIo` if persisting fails.
    pub fn retire_namespace(&self, token: &str) -> StoreResult<()> {
        let mut table = self.namespaces.write();
        let mut updated = table.clone();
        let record = updated.retire(token)?;
        let mut batch = WriteBatch::new();
        namespace::persist(&mut batch, &record);
        self.commit(batch)?;
        *table = updated;
        info!(token, prefix = record.prefix, "retired namespace");
        Ok(())
    }

    /// Picks up namespace rows written by someone else (replicated batches).
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` while reading the persisted rows.
    pub fn reload_namespaces(&self) -> StoreResult<()> {
        let persisted = self.persisted_namespaces()?;
        let rejected = self.namespaces.write().absorb(persisted);
        for record in rejected {
            warn!(
                token = %record.token,
                prefix = record.prefix,
                "ignoring replicated namespace that conflicts with local table"
            );
        }
        Ok(())
    }

    /// Snapshot keys from `start` on: at most `max_pairs` engine keys are
    /// examined and the page stops early once it holds `max_bytes` of keys
    /// and values, though it always carries at least one pair when any is
    /// left. User keys and namespace rows travel; replication state does not.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read failure.
    pub fn snapshot_chunk(
        &self,
        start: &[u8],
        max_pairs: usize,
        max_bytes: usize,
    ) -> StoreResult<SnapshotChunk> {
        let engine = self.engine.read();
        let page = engine
            .scan_bounded(start, b"", max_pairs.max(1))
            .map_err(StoreError::EngineIo)?;
        let seq = engine.seq();
        drop(engine);

        let mut pairs = Vec::new();
        let mut bytes = 0;
        let mut next = page.next;
        for (key, value) in page.pairs {
            if !is_snapshot_key(&key) {
                continue;
            }
            let len = key.len() + value.len();
            if !pairs.is_empty() && bytes + len > max_bytes {
                next = Some(key);
                break;
            }
            bytes += len;
            pairs.push((key, value));
        }
        Ok(SnapshotChunk { seq, pairs, next })
    }

    /// Makes the user keys in `[start, end)` exactly `pairs`, in one batch
    /// with `extra` appended. `end = None` runs to the end of the keyspace.
    /// Namespace rows in `pairs` are written; local system keys are never
    /// deleted.
    ///
    /// # Errors
    ///
    /// `EngineIo`; on failure the range is untouched.
    pub fn replace_range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
        extra: WriteBatch,
    ) -> StoreResult<u64> {
        let writer = self.writer.lock();
        let mut engine = self.engine.write();

        let incoming: BTreeMap<Vec<u8>, Vec<u8>> = pairs
            .into_iter()
            .filter(|(key, _)| is_snapshot_key(key))
            .collect();

        let user_start = (SYSTEM_PREFIX + 1).to_be_bytes();
        let from = start.max(&user_start[..]);
        let existing = match end {
            Some(end) if end <= from => Vec::new(),
            Some(end) => engine.scan(from, end).map_err(StoreError::EngineIo)?,
            None => engine.scan(from, b"").map_err(StoreError::EngineIo)?,
        };

        let mut batch = WriteBatch::new();
        for (key, _) in existing {
            if !incoming.contains_key(&key) {
                batch.delete(key);
            }
        }
        let removed = batch.len();
        let written = incoming.len();
        for (key, value) in incoming {
            batch.put(key, value);
        }
        batch.extend(extra);

        let seq = self.commit_locked(&mut engine, batch.into_ops())?;
        drop(engine);
        drop(writer);

        debug!(seq, removed, written, "replaced key range");
        self.reload_namespaces()?;
        Ok(seq)
    }

    /// Replaces every user key with `pairs` in one batch, then appends
    /// `extra`.
    ///
    /// # Errors
    ///
    /// Same as [`replace_range`](Self::replace_range).
    pub fn replace_dataset(
        &self,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
        extra: WriteBatch,
    ) -> StoreResult<u64> {
        self.replace_range(b"", None, pairs, extra)
    }

    /// # Errors
    ///
    /// `EngineIo` on flush failure.
    pub fn flush(&self) -> StoreResult<()> {
        self.engine
            .write()
            .force_flush()
            .map_err(StoreError::EngineIo)
    }

    /// # Errors
    ///
    /// `EngineIo` on compaction failure.
    pub fn compact(&self) -> StoreResult<()> {
        self.engine.write().compact().map_err(StoreError::EngineIo)
    }

    pub fn stats(&self) -> StorageStats {
        // namespace lock before engine lock, everywhere
        let namespaces = self.namespaces.read().live().len();
        let engine = self.engine.read();
        StorageStats {
            last_seq: engine.seq(),
            memtable_entries: engine.memtable_len(),
            memtable_bytes: engine.memtable_size(),
            l0_tables: engine.l0_sstable_count(),
            l1_tables: engine.l1_sstable_count(),
            namespaces,
        }
    }
}

/// User keys and namespace rows travel in snapshots; replication state does not.
fn is_snapshot_key(key: &[u8]) -> bool {
    match decode_raw(key) {
        Ok(RawKey::System { tag, .. }) => tag == SYS_NAMESPACE,
        Ok(_) => true,
        Err(_) => key.len() >= 2 && key[..2] != SYSTEM_PREFIX.to_be_bytes(),
    }
}
