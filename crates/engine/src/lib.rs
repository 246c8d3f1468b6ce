//! # Engine - Eddy ordered storage engine
//!
//! Ties the [`memtable`], [`wal`] and [`sstable`] crates together into an
//! ordered, byte-keyed LSM store whose only mutation primitive is the
//! **atomic batch**.
//!
//! ## Layout
//!
//! ```text
//! write(ops)      -> wal.log frame -> memtable
//!                    memtable over threshold  -> flush() -> L0 table
//!                    L0 count reaches trigger -> compact() -> one L1 table
//! get/scan(range) -> memtable, then L0 newest first, then L1
//! ```
//!
//! | Module         | Holds                                                 |
//! |----------------|-------------------------------------------------------|
//! | [`recovery`]   | `Engine::open`, WAL replay, temp file cleanup         |
//! | [`write`]      | batch commit, flush                                   |
//! | [`read`]       | point reads and range scans                           |
//! | [`compaction`] | merging every table into L1, dropping tombstones      |
//! | [`manifest`]   | live tables per level, durable sequence               |
//!
//! ## Sequence numbers
//!
//! Every non-empty batch gets exactly one sequence number, one higher than the
//! previous batch. All ops of a batch carry that number into the memtable and
//! SSTables. The counter survives restarts through the WAL, the SSTable
//! footers and the manifest, so it never goes backwards.
//!
//! ## Crash Safety
//!
//! A batch is appended to the WAL as a single CRC-framed record **before** it
//! touches the memtable, and the WAL is only truncated after a successful
//! flush and manifest update. A torn record is dropped whole on replay, so a
//! batch is either fully present or fully absent after restart.
mod compaction;
mod manifest;
mod read;
mod recovery;
mod write;

use manifest::Manifest;
use memtable::Memtable;
pub use read::ScanPage;
use sstable::{MergeIterator, SSTableReader, SSTableWriter};
use std::path::PathBuf;
use wal::WalWriter;

pub use wal::BatchOp;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// The ordered store behind every Eddy database.
///
/// # Write Path
///
/// 1. Assign the next sequence number to the whole batch.
/// 2. Append the batch to the WAL as one frame.
/// 3. Apply every op to the memtable under that sequence number.
/// 4. Flush (and maybe compact) once the memtable is over threshold.
///
/// # Read Path
///
/// Memtable first, then L0 newest-first, then L1. The first hit wins and a
/// tombstone hides anything older.
pub struct Engine {
    pub(crate) mem: Memtable,
    /// Flush outputs, newest first. Key ranges may overlap.
    pub(crate) l0_sstables: Vec<SSTableReader>,
    /// Compaction outputs, newest first.
    pub(crate) l1_sstables: Vec<SSTableReader>,
    pub(crate) wal_path: PathBuf,
    pub(crate) sst_dir: PathBuf,
    pub(crate) wal_writer: WalWriter,
    pub(crate) manifest: Manifest,

    /// Sequence number of the last committed batch.
    pub(crate) seq: u64,

    pub(crate) flush_threshold: usize,

    /// `0` disables auto-compaction.
    pub(crate) l0_compaction_trigger: usize,

    pub(crate) wal_sync: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("seq", &self.seq)
            .field("sst_dir", &self.sst_dir)
            .field("memtable_bytes", &self.mem.approx_size())
            .field("flush_threshold", &self.flush_threshold)
            .field("tables", &(self.l0_sstables.len(), self.l1_sstables.len()))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Sequence number of the last committed batch (0 for a fresh store).
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn l0_compaction_trigger(&self) -> usize {
        self.l0_compaction_trigger
    }

    /// Set to `0` to disable auto-compaction.
    pub fn set_l0_compaction_trigger(&mut self, trigger: usize) {
        self.l0_compaction_trigger = trigger;
    }

    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.l0_sstables.len() + self.l1_sstables.len()
    }

    #[must_use]
    pub fn l0_sstable_count(&self) -> usize {
        self.l0_sstables.len()
    }

    #[must_use]
    pub fn l1_sstable_count(&self) -> usize {
        self.l1_sstables.len()
    }

    /// Number of entries (tombstones included) in the memtable.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.mem.len()
    }

    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.mem.approx_size()
    }
}

/// Best-effort flush on drop. Anything that fails here is still in the WAL.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.mem.is_empty() {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "flush on drop failed; data remains in WAL");
            }
        }
    }
}

#[cfg(test)]
mod tests;
