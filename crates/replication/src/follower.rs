//! Follower side: fetches entries and replays them into the local store.
//!
//! Each entry is committed as one local batch holding its ops plus the new
//! applied sequence, so a crash either applies an entry whole or not at all,
//! and a retried entry is recognised and skipped.
//!
//! Resync pulls the producer's dataset in key-ordered chunks and replaces
//! the matching local range one chunk at a time. Chunks are read at
//! different moments, so the result is fuzzy; the applied sequence is set
//! to the first chunk's sequence and replaying the log from there brings
//! every key up to date. Until the last chunk lands a marker key records
//! that the dataset is partial, and a follower that finds it resyncs again
//! before fetching.

use byteorder::{BigEndian, ByteOrder};
use config::Config;
use crossbeam::channel::{self, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use store::codec::{applied_seq_key, resync_marker_key, system_key, SYS_REPLICATION};
use store::namespace::is_namespace_key;
use store::{BatchOp, Storage, WriteBatch};
use tracing::{debug, info, warn};

use crate::error::{ReplResult, ReplicationError};
use crate::log::ReplicationEntry;
use crate::protocol::{Request, Response};
use crate::transport::SyncTransport;

/// How long one fetch may wait at the producer for new entries.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Pairs requested per snapshot chunk.
pub const DEFAULT_SNAPSHOT_CHUNK: u32 = 1024;

const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of one [`Follower::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// `entries` were applied; some of a batch may have been skipped as
    /// already applied.
    Applied { entries: usize, next_sequence: u64 },
    UpToDate { last_published: u64 },
    /// The local dataset was replaced by a snapshot taken at `seq`.
    Resynced { seq: u64 },
}

/// Last sequence this store applied as a follower, `0` if none.
///
/// # Errors
///
/// `Store` on read failure, `Corrupt` if the stored value is not 8 bytes.
pub fn applied_sequence(storage: &Storage) -> ReplResult<u64> {
    match storage.get(&applied_seq_key())? {
        None => Ok(0),
        Some(bytes) if bytes.len() == 8 => Ok(BigEndian::read_u64(&bytes)),
        Some(bytes) => Err(ReplicationError::corrupt(format!(
            "applied sequence is {} bytes",
            bytes.len()
        ))),
    }
}

fn is_replication_key(key: &[u8]) -> bool {
    key.starts_with(&system_key(SYS_REPLICATION, b""))
}

#[derive(Debug)]
pub struct Follower {
    storage: Arc<Storage>,
    next_sequence: u64,
    fetch_batch: u32,
    max_wait: Duration,
    snapshot_chunk: u32,
    /// Set while the local dataset is a partly installed snapshot.
    resync_pending: bool,
}

impl Follower {
    /// Resumes from the applied sequence persisted in `storage`.
    ///
    /// # Errors
    ///
    /// Same as [`applied_sequence`].
    pub fn new(storage: Arc<Storage>, cfg: &Config) -> ReplResult<Self> {
        let applied = applied_sequence(&storage)?;
        let resync_pending = storage.get(&resync_marker_key())?.is_some();
        if resync_pending {
            warn!(applied, "previous resync did not finish, resyncing again");
        } else {
            info!(applied, "follower resuming");
        }
        Ok(Self {
            storage,
            next_sequence: applied + 1,
            fetch_batch: u32::try_from(cfg.fetch_batch).unwrap_or(u32::MAX),
            max_wait: DEFAULT_MAX_WAIT,
            snapshot_chunk: DEFAULT_SNAPSHOT_CHUNK,
            resync_pending,
        })
    }

    /// Sets how long each fetch waits at the producer. Zero polls.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets how many pairs each snapshot chunk asks for.
    pub fn with_snapshot_chunk(mut self, pairs: u32) -> Self {
        self.snapshot_chunk = pairs.max(1);
        self
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Applies `entry` if it is the next one. Returns `false` for an entry
    /// already applied.
    ///
    /// # Errors
    ///
    /// `Protocol` if the entry skips ahead of `next_sequence`, `Store` if the
    /// local commit fails (nothing from the entry is applied).
    pub fn apply(&mut self, entry: &ReplicationEntry) -> ReplResult<bool> {
        if entry.seq < self.next_sequence {
            debug!(seq = entry.seq, "skipping already applied entry");
            return Ok(false);
        }
        if entry.seq > self.next_sequence {
            return Err(ReplicationError::protocol(format!(
                "expected entry {}, got {}",
                self.next_sequence, entry.seq
            )));
        }

        let mut batch = WriteBatch::new();
        let mut namespaces_changed = false;
        for op in entry.ops.iter() {
            // the producer's own follower bookkeeping stays there
            if is_replication_key(op.key()) {
                continue;
            }
            namespaces_changed |= is_namespace_key(op.key());
            match op {
                BatchOp::Put { key, value } => batch.put(key.clone(), value.clone()),
                BatchOp::Del { key } => batch.delete(key.clone()),
            }
        }
        batch.put(applied_seq_key(), entry.seq.to_be_bytes().to_vec());

        self.storage.commit(batch)?;
        self.next_sequence = entry.seq + 1;
        if namespaces_changed {
            self.storage.reload_namespaces()?;
        }
        Ok(true)
    }

    /// Replaces the local dataset with `pairs` taken at `seq`.
    ///
    /// # Errors
    ///
    /// `Store` if the replacement fails; the old dataset is then untouched.
    pub fn install_snapshot(&mut self, seq: u64, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> ReplResult<()> {
        let count = pairs.len();
        let mut applied = WriteBatch::new();
        applied.put(applied_seq_key(), seq.to_be_bytes().to_vec());
        applied.delete(resync_marker_key());
        self.storage.replace_dataset(pairs, applied)?;
        self.next_sequence = seq + 1;
        self.resync_pending = false;
        info!(seq, pairs = count, "installed snapshot");
        Ok(())
    }

    /// Full resync from the producer's dataset, fetched in chunks.
    ///
    /// Returns the sequence replay resumes after.
    ///
    /// # Errors
    ///
    /// Transport errors, `Remote` if the producer fails to snapshot,
    /// `Protocol` on an unexpected response or a chunk cursor that does not
    /// move forward. Chunks installed before an error stay installed and the
    /// next poll starts the resync over.
    pub fn resync<T: SyncTransport + ?Sized>(&mut self, transport: &mut T) -> ReplResult<u64> {
        self.resync_pending = true;
        let mut start = Vec::new();
        let mut first_seq = None;
        let mut chunks = 0usize;
        let mut total = 0usize;
        loop {
            let request = Request::SnapshotChunk {
                start: start.clone(),
                max_pairs: self.snapshot_chunk,
            };
            let (seq, pairs, next) = match transport.call(&request)? {
                Response::SnapshotChunk { seq, pairs, next } => (seq, pairs, next),
                Response::Error { message } => return Err(ReplicationError::Remote(message)),
                other => {
                    return Err(ReplicationError::protocol(format!(
                        "unexpected response to snapshot chunk: {other:?}"
                    )))
                }
            };
            if let Some(next) = &next {
                if next.as_slice() <= start.as_slice() {
                    return Err(ReplicationError::protocol("snapshot cursor did not advance"));
                }
            }
            let base = *first_seq.get_or_insert(seq);

            let mut extra = WriteBatch::new();
            match next {
                Some(_) => extra.put(resync_marker_key(), base.to_be_bytes().to_vec()),
                None => {
                    extra.put(applied_seq_key(), base.to_be_bytes().to_vec());
                    extra.delete(resync_marker_key());
                }
            }
            chunks += 1;
            total += pairs.len();
            self.storage.replace_range(&start, next.as_deref(), pairs, extra)?;

            match next {
                Some(next) => start = next,
                None => break,
            }
        }

        let seq = first_seq.unwrap_or_default();
        self.next_sequence = seq + 1;
        self.resync_pending = false;
        info!(seq, chunks, pairs = total, "installed snapshot");
        Ok(seq)
    }

    /// One fetch round: applies what the producer returns, resyncing when
    /// the producer can no longer serve `next_sequence`.
    ///
    /// # Errors
    ///
    /// Transport, apply or resync errors. Entries applied before an error
    /// stay applied.
    pub fn poll<T: SyncTransport + ?Sized>(&mut self, transport: &mut T) -> ReplResult<Progress> {
        if self.resync_pending {
            let seq = self.resync(transport)?;
            return Ok(Progress::Resynced { seq });
        }
        let request = Request::Fetch {
            next_sequence: self.next_sequence,
            max_entries: self.fetch_batch,
            max_wait_ms: self.max_wait.as_millis() as u64,
        };
        match transport.call(&request)? {
            Response::Entries {
                entries,
                next_sequence,
            } => {
                if entries.is_empty() {
                    return Err(ReplicationError::protocol("empty entries response"));
                }
                let mut applied = 0;
                for entry in &entries {
                    if self.apply(entry)? {
                        applied += 1;
                    }
                }
                if next_sequence != self.next_sequence {
                    return Err(ReplicationError::protocol(format!(
                        "producer says next is {next_sequence}, follower is at {}",
                        self.next_sequence
                    )));
                }
                debug!(applied, next_sequence, "applied replication entries");
                Ok(Progress::Applied {
                    entries: applied,
                    next_sequence,
                })
            }
            Response::UpToDate { last_published } => Ok(Progress::UpToDate { last_published }),
            Response::SequenceTooOld { floor } => {
                info!(next = self.next_sequence, floor, "behind retention floor, resyncing");
                let seq = self.resync(transport)?;
                Ok(Progress::Resynced { seq })
            }
            Response::SequenceAhead { last_published } => {
                warn!(
                    next = self.next_sequence,
                    last_published, "follower is ahead of producer, resyncing"
                );
                let seq = self.resync(transport)?;
                Ok(Progress::Resynced { seq })
            }
            Response::Error { message } => Err(ReplicationError::Remote(message)),
            other => Err(ReplicationError::protocol(format!(
                "unexpected response to fetch: {other:?}"
            ))),
        }
    }
}

/// A running follower loop. Stops and joins on [`stop`](Self::stop) or drop.
pub struct FollowerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FollowerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("follower thread panicked");
            }
        }
    }
}

impl Drop for FollowerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs `follower` on a background thread, connecting through `connect`.
///
/// Transport and apply errors drop the connection and retry with
/// exponential backoff; there is no retry inside a single poll.
pub fn spawn<T, C>(mut follower: Follower, mut connect: C) -> FollowerHandle
where
    T: SyncTransport + 'static,
    C: FnMut() -> ReplResult<T> + Send + 'static,
{
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let thread = thread::Builder::new()
        .name("eddy-follower".into())
        .spawn(move || {
            info!(next = follower.next_sequence(), "follower started");
            let mut transport: Option<T> = None;
            let mut backoff = MIN_BACKOFF;
            loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                }

                if transport.is_none() {
                    match connect() {
                        Ok(connected) => transport = Some(connected),
                        Err(e) => {
                            warn!(error = %e, ?backoff, "cannot reach producer");
                            if stopped_during(&stop_rx, backoff) {
                                break;
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            continue;
                        }
                    }
                }
                let Some(conn) = transport.as_mut() else {
                    continue;
                };

                match follower.poll(conn) {
                    Ok(progress) => {
                        backoff = MIN_BACKOFF;
                        if let Progress::Resynced { seq } = progress {
                            info!(seq, "follower resynced");
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            next = follower.next_sequence(),
                            ?backoff,
                            "replication poll failed"
                        );
                        transport = None;
                        if stopped_during(&stop_rx, backoff) {
                            break;
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
            info!(next = follower.next_sequence(), "follower stopped");
        });

    match thread {
        Ok(thread) => FollowerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        },
        Err(e) => {
            warn!(error = %e, "failed to start follower thread");
            FollowerHandle {
                stop: None,
                thread: None,
            }
        }
    }
}

fn stopped_during(stop: &channel::Receiver<()>, wait: Duration) -> bool {
    !matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
}
