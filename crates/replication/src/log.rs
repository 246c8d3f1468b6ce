//! The replication log.
//!
//! Registered as a [`CommitObserver`] on [`Storage`], so it receives every
//! committed batch under the commit lock, in sequence order, and keeps the
//! most recent ones for followers to fetch. A log opened with
//! [`ReplicationLog::open`] also writes each entry to a [`Journal`] and
//! reloads the retained window from it on restart.
//!
//! ```text
//!   floor                       last_published
//!     │                               │
//!     ▼                               ▼
//!   [ e(n) | e(n+1) | ... | e(m) ]   next = m + 1 -> UpToDate
//!   next < n -> SequenceTooOld        next > m + 1 -> SequenceAhead
//! ```
//!
//! The log holds no per-follower state: every fetch names its own starting
//! sequence.

use config::{Config, RetentionPolicy};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{now_ms, BatchOp, CommitObserver, CommittedBatch, Storage};
use tracing::{debug, info, warn};

use crate::error::ReplResult;
use crate::journal::Journal;

/// `[seq][committed_at_ms][op_count]`
const ENTRY_HEADER_LEN: usize = 8 + 8 + 4;

/// One committed batch, exactly as the producer committed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEntry {
    pub seq: u64,
    pub ops: Arc<Vec<BatchOp>>,
    pub committed_at_ms: u64,
}

impl ReplicationEntry {
    pub fn new(seq: u64, ops: Vec<BatchOp>, committed_at_ms: u64) -> Self {
        Self {
            seq,
            ops: Arc::new(ops),
            committed_at_ms,
        }
    }

    /// Size of the entry on the wire; also what retention counts.
    pub fn encoded_len(&self) -> usize {
        ENTRY_HEADER_LEN + self.ops.iter().map(BatchOp::encoded_len).sum::<usize>()
    }
}

impl From<&CommittedBatch> for ReplicationEntry {
    fn from(batch: &CommittedBatch) -> Self {
        Self {
            seq: batch.seq,
            ops: Arc::clone(&batch.ops),
            committed_at_ms: batch.committed_at_ms,
        }
    }
}

/// Caps on one fetch. At least one entry is always returned when any is
/// available, even if it alone exceeds `max_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_entries: config::DEFAULT_FETCH_BATCH,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// A non-empty, gap-free run starting at the requested sequence.
    Entries {
        entries: Vec<Arc<ReplicationEntry>>,
        next_sequence: u64,
    },
    /// Nothing after `last_published` yet.
    UpToDate { last_published: u64 },
    /// The requested sequence has been pruned; the follower must resync.
    SequenceTooOld { floor: u64 },
    /// The follower is past anything this producer published.
    SequenceAhead { last_published: u64 },
}

/// Read-only view for monitoring replication lag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStatus {
    pub last_published: u64,
    /// Oldest sequence still fetchable; `last_published + 1` when empty.
    pub retention_floor: u64,
    pub retained_entries: usize,
    pub retained_bytes: usize,
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<Arc<ReplicationEntry>>,
    bytes: usize,
    last_published: u64,
    journal: Option<Journal>,
}

impl LogState {
    fn floor(&self) -> u64 {
        self.entries
            .front()
            .map(|e| e.seq)
            .unwrap_or(self.last_published + 1)
    }

    fn pop_front(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.bytes -= entry.encoded_len();
        }
    }

    fn push_back(&mut self, entry: ReplicationEntry) {
        self.bytes += entry.encoded_len();
        self.last_published = entry.seq;
        self.entries.push_back(Arc::new(entry));
    }

    /// Drops entries over any limit, always keeping the newest one.
    fn prune(&mut self, policy: &RetentionPolicy, now: u64) {
        let max_age = policy.max_age.as_millis() as u64;
        let floor = self.floor();
        while let Some(front) = self.entries.front() {
            if self.entries.len() == 1 {
                break;
            }
            let over = self.entries.len() > policy.max_entries
                || self.bytes > policy.max_bytes
                || now.saturating_sub(front.committed_at_ms) > max_age;
            if !over {
                break;
            }
            self.pop_front();
        }

        let new_floor = self.floor();
        if new_floor != floor {
            if let Some(journal) = self.journal.as_mut() {
                if let Err(e) = journal.truncate_front(new_floor) {
                    warn!(floor = new_floor, error = %e, "failed to prune replication journal");
                }
            }
        }
    }

    fn drop_all(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.reset() {
                warn!(error = %e, "failed to reset replication journal");
            }
        }
    }
}

#[derive(Debug)]
pub struct ReplicationLog {
    state: Mutex<LogState>,
    published: Condvar,
    policy: RetentionPolicy,
}

impl ReplicationLog {
    /// An empty log whose first expected entry is `last_published + 1`.
    pub fn new(last_published: u64, policy: RetentionPolicy) -> Self {
        Self::with_journal(last_published, policy, None)
    }

    pub(crate) fn with_journal(last_published: u64, policy: RetentionPolicy, journal: Option<Journal>) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
                bytes: 0,
                last_published,
                journal,
            }),
            published: Condvar::new(),
            policy,
        }
    }

    /// Creates an in-memory log starting at the store's current sequence
    /// and registers it for every later commit.
    pub fn attach(storage: &Storage, policy: RetentionPolicy) -> Arc<Self> {
        storage.add_observer_with(|seq| {
            debug!(seq, "replication log attached");
            ReplicationLog::new(seq, policy)
        })
    }

    /// Like [`attach`](Self::attach), but journaled under
    /// [`Config::repl_dir`].
    ///
    /// Journaled entries are kept only if they end exactly at the store's
    /// current sequence. A journal that stops short of it, or runs past it
    /// (the store lost commits the journal kept), is discarded and the log
    /// starts empty.
    ///
    /// # Errors
    ///
    /// `Io` if the journal cannot be opened.
    pub fn open(storage: &Storage, cfg: &Config) -> ReplResult<Arc<Self>> {
        let (journal, entries) = Journal::open(cfg.repl_dir(), cfg.wal_sync)?;
        let policy = cfg.retention;
        Ok(storage.add_observer_with(move |seq| {
            let log = ReplicationLog::with_journal(seq, policy, Some(journal));
            log.restore(seq, entries);
            log
        }))
    }

    fn restore(&self, seq: u64, entries: Vec<ReplicationEntry>) {
        let mut state = self.state.lock();
        match entries.last().map(|e| e.seq) {
            None => {}
            Some(last) if last == seq => {
                for entry in entries {
                    state.push_back(entry);
                }
                state.prune(&self.policy, now_ms());
                info!(
                    floor = state.floor(),
                    last_published = seq,
                    "replication log restored from journal"
                );
            }
            Some(last) => {
                warn!(
                    journal = last,
                    store = seq,
                    "replication journal does not match the store; discarding it"
                );
                state.drop_all();
            }
        }
    }

    /// Appends `entry` and wakes waiting fetches.
    ///
    /// Entries at or below `last_published` are ignored. An entry that skips
    /// ahead drops everything retained, so no fetch can see a gap.
    pub fn publish(&self, entry: ReplicationEntry) {
        let mut state = self.state.lock();
        if entry.seq <= state.last_published {
            warn!(
                seq = entry.seq,
                last_published = state.last_published,
                "ignoring replayed replication entry"
            );
            return;
        }
        if entry.seq != state.last_published + 1 {
            warn!(
                seq = entry.seq,
                expected = state.last_published + 1,
                "gap in replication log; dropping retained entries"
            );
            state.drop_all();
        }

        if let Some(journal) = state.journal.as_mut() {
            if let Err(e) = journal.append(&entry) {
                warn!(seq = entry.seq, error = %e, "failed to journal replication entry");
            }
        }
        state.push_back(entry);
        state.prune(&self.policy, now_ms());
        drop(state);

        self.published.notify_all();
    }

    /// Entries starting at `next`, bounded by `limits`.
    pub fn fetch(&self, next: u64, limits: FetchLimits) -> FetchResult {
        let mut state = self.state.lock();
        state.prune(&self.policy, now_ms());

        let last_published = state.last_published;
        if next > last_published + 1 {
            return FetchResult::SequenceAhead { last_published };
        }
        if next == last_published + 1 {
            return FetchResult::UpToDate { last_published };
        }
        let floor = state.floor();
        if next < floor {
            return FetchResult::SequenceTooOld { floor };
        }

        let max_entries = limits.max_entries.max(1);
        let mut entries = Vec::new();
        let mut bytes = 0;
        for entry in state.entries.iter().skip((next - floor) as usize) {
            let len = entry.encoded_len();
            if !entries.is_empty() && (entries.len() >= max_entries || bytes + len > limits.max_bytes)
            {
                break;
            }
            bytes += len;
            entries.push(Arc::clone(entry));
        }

        let next_sequence = entries.last().map(|e| e.seq + 1).unwrap_or(next);
        FetchResult::Entries {
            entries,
            next_sequence,
        }
    }

    /// Blocks until an entry at or after `next` is published or `timeout`
    /// passes. Returns `true` if one is available.
    pub fn wait_for(&self, next: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.last_published < next {
            if self
                .published
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.last_published >= next;
            }
        }
        true
    }

    pub fn last_published(&self) -> u64 {
        self.state.lock().last_published
    }

    pub fn status(&self) -> LogStatus {
        let state = self.state.lock();
        LogStatus {
            last_published: state.last_published,
            retention_floor: state.floor(),
            retained_entries: state.entries.len(),
            retained_bytes: state.bytes,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }
}

impl CommitObserver for ReplicationLog {
    fn on_commit(&self, batch: &CommittedBatch) {
        self.publish(ReplicationEntry::from(batch));
    }
}
