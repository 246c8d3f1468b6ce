//! Orphan collector.
//!
//! Deletes and replaces only rewrite metadata, leaving the old version's
//! subkeys behind. The collector walks the keyspace in bounded steps and
//! removes subkeys that no live metadata version claims, plus everything
//! under retired namespaces. With active expiry on, it also deletes the
//! metadata of expired keys.
//!
//! Only invisible data is removed, and every deletion is an ordinary
//! committed batch, so followers see the same cleanup.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::batch::WriteBatch;
use crate::codec::{decode_raw, encode_metadata_key, RawKey, SYSTEM_PREFIX};
use crate::error::StoreResult;
use crate::metadata::{now_ms, Metadata};
use crate::storage::StorageGuard;
use crate::Storage;

/// Keys examined per step by [`OrphanCollector::sweep`].
pub const DEFAULT_SWEEP_BUDGET: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub budget: usize,
    pub active_expiry: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            budget: DEFAULT_SWEEP_BUDGET,
            active_expiry: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub steps: u64,
    pub scanned: u64,
    /// Subkeys no live metadata version claims.
    pub orphans: u64,
    /// Metadata records removed by active expiry.
    pub expired: u64,
    /// Keys removed because their namespace was retired.
    pub retired: u64,
}

impl SweepStats {
    fn absorb(&mut self, other: SweepStats) {
        self.steps += other.steps;
        self.scanned += other.scanned;
        self.orphans += other.orphans;
        self.expired += other.expired;
        self.retired += other.retired;
    }

    pub fn deleted(&self) -> u64 {
        self.orphans + self.expired + self.retired
    }
}

/// Result of one bounded step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStep {
    /// Resume point, `None` once the keyspace is exhausted.
    pub next: Option<Vec<u8>>,
    pub stats: SweepStats,
}

/// First key of the user keyspace (everything above the system area).
fn user_start() -> Vec<u8> {
    (SYSTEM_PREFIX + 1).to_be_bytes().to_vec()
}

pub struct OrphanCollector<'s> {
    storage: &'s Storage,
    options: CollectorOptions,
}

impl<'s> OrphanCollector<'s> {
    pub fn new(storage: &'s Storage, options: CollectorOptions) -> Self {
        Self { storage, options }
    }

    /// Examines at most `budget` keys starting at `cursor` (an empty cursor
    /// starts at the beginning) and deletes what is reclaimable.
    ///
    /// Steps may be interleaved with writes and interrupted at any point.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure. Keys that fail to decode are
    /// logged and skipped.
    pub fn sweep_step(&self, cursor: &[u8], budget: usize) -> StoreResult<SweepStep> {
        let start = if cursor.is_empty() {
            user_start()
        } else {
            cursor.to_vec().max(user_start())
        };

        // the table is read before the commit lock is taken
        let (live, retired): (HashSet<u16>, HashSet<u16>) = self.storage.with_namespaces(|t| {
            (
                t.live().iter().map(|ns| ns.prefix()).collect(),
                t.retired().into_iter().collect(),
            )
        });

        let now = now_ms();
        let mut guard = self.storage.lock();
        let page = guard.scan_bounded(&start, b"", budget.max(1))?;

        let mut stats = SweepStats {
            steps: 1,
            ..SweepStats::default()
        };
        let mut batch = WriteBatch::new();
        let mut cache = MetadataCache::default();

        for (raw, value) in &page.pairs {
            stats.scanned += 1;
            let decoded = match decode_raw(raw) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable key");
                    continue;
                }
            };

            match decoded {
                RawKey::System { .. } => {}
                RawKey::Metadata { prefix, .. } | RawKey::Subkey { prefix, .. }
                    if retired.contains(&prefix) =>
                {
                    batch.delete(raw.clone());
                    stats.retired += 1;
                }
                RawKey::Metadata { prefix, .. } | RawKey::Subkey { prefix, .. }
                    if !live.contains(&prefix) => {}
                RawKey::Metadata { prefix, key } => {
                    if !self.options.active_expiry {
                        continue;
                    }
                    match Metadata::decode(value) {
                        Ok(meta) if meta.is_expired(now) => {
                            batch.delete(raw.clone());
                            batch.touch(prefix, key);
                            stats.expired += 1;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "skipping undecodable metadata"),
                    }
                }
                RawKey::Subkey {
                    prefix,
                    key,
                    version,
                    ..
                } => {
                    if !cache.claim(&guard, prefix, key, now)?.keeps(version) {
                        batch.delete(raw.clone());
                        stats.orphans += 1;
                    }
                }
            }
        }

        if !batch.is_empty() {
            let seq = guard.commit(batch)?;
            debug!(
                seq,
                orphans = stats.orphans,
                expired = stats.expired,
                retired = stats.retired,
                "sweep step committed"
            );
        }

        Ok(SweepStep {
            next: page.next,
            stats,
        })
    }

    /// Runs steps over the whole keyspace.
    ///
    /// # Errors
    ///
    /// The first step error; earlier steps stay committed.
    pub fn sweep(&self) -> StoreResult<SweepStats> {
        let mut total = SweepStats::default();
        let mut cursor = Vec::new();
        loop {
            let step = self.sweep_step(&cursor, self.options.budget)?;
            total.absorb(step.stats);
            match step.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        if total.deleted() > 0 {
            info!(
                scanned = total.scanned,
                orphans = total.orphans,
                expired = total.expired,
                retired = total.retired,
                "sweep finished"
            );
        }
        Ok(total)
    }
}

/// What a key's metadata says about its subkeys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// Only this version is visible.
    Version(u64),
    /// No live record: every subkey is an orphan.
    Nothing,
    /// The record could not be decoded; leave the subkeys alone.
    Unknown,
}

impl Claim {
    fn keeps(self, version: u64) -> bool {
        match self {
            Claim::Version(live) => live == version,
            Claim::Nothing => false,
            Claim::Unknown => true,
        }
    }
}

/// Remembers the last metadata lookup; subkeys of one key are adjacent.
#[derive(Default)]
struct MetadataCache {
    last: Option<(u16, Vec<u8>, Claim)>,
}

impl MetadataCache {
    fn claim(
        &mut self,
        guard: &StorageGuard<'_>,
        prefix: u16,
        key: &[u8],
        now: u64,
    ) -> StoreResult<Claim> {
        if let Some((p, k, claim)) = &self.last {
            if *p == prefix && k == key {
                return Ok(*claim);
            }
        }
        let claim = match guard.get(&encode_metadata_key(prefix, key))? {
            Some(bytes) => match Metadata::decode(&bytes) {
                Ok(meta) if !meta.is_none() && !meta.is_expired(now) => Claim::Version(meta.version),
                Ok(_) => Claim::Nothing,
                Err(e) => {
                    warn!(error = %e, "undecodable metadata while sweeping");
                    Claim::Unknown
                }
            },
            None => Claim::Nothing,
        };
        self.last = Some((prefix, key.to_vec(), claim));
        Ok(claim)
    }
}

/// A running background collector. Stops and joins on [`stop`](Self::stop)
/// or drop.
pub struct CollectorHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // dropping the sender wakes the worker
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("collector thread panicked");
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs a full sweep every `interval` on a background thread.
pub fn spawn(
    storage: Arc<Storage>,
    interval: Duration,
    options: CollectorOptions,
) -> CollectorHandle {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let thread = thread::Builder::new()
        .name("eddy-collector".into())
        .spawn(move || {
            info!(?interval, active_expiry = options.active_expiry, "collector started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let collector = OrphanCollector::new(&storage, options);
                        if let Err(e) = collector.sweep() {
                            warn!(error = %e, "sweep failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("collector stopped");
        });

    match thread {
        Ok(thread) => CollectorHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        },
        Err(e) => {
            warn!(error = %e, "failed to start collector thread");
            CollectorHandle {
                stop: None,
                thread: None,
            }
        }
    }
}
