//! Write path: `write()`, `force_flush()`, and the internal `flush()`.
//!
//! Every mutation arrives as a batch of [`BatchOp`]s. The batch is appended to
//! the WAL as one record carrying one sequence number, then applied to the
//! memtable. When the memtable crosses the flush threshold it is persisted to
//! a new SSTable.
use anyhow::Result;
use std::fs::OpenOptions;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use wal::{BatchOp, WalWriter};

use crate::manifest::Level;
use crate::{Engine, SSTableReader, SSTableWriter, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Engine {
    /// Commits `ops` atomically and returns the batch's sequence number.
    ///
    /// An empty batch writes nothing and returns the current sequence number.
    /// Ops apply in order, so a later op on the same key wins.
    ///
    /// # Errors
    ///
    /// Rejects empty or oversized keys and oversized values before anything
    /// is written. A WAL append failure is propagated and the batch has no
    /// effect. Once the append succeeds the batch is committed: a failed
    /// automatic flush is logged and retried by the next write.
    pub fn write(&mut self, ops: &[BatchOp]) -> Result<u64> {
        if ops.is_empty() {
            return Ok(self.seq);
        }

        for op in ops {
            let key = op.key();
            anyhow::ensure!(!key.is_empty(), "key must not be empty");
            anyhow::ensure!(
                key.len() <= MAX_KEY_SIZE,
                "key too large: {} bytes (max {})",
                key.len(),
                MAX_KEY_SIZE
            );
            if let BatchOp::Put { value, .. } = op {
                anyhow::ensure!(
                    value.len() <= MAX_VALUE_SIZE,
                    "value too large: {} bytes (max {})",
                    value.len(),
                    MAX_VALUE_SIZE
                );
            }
        }

        let seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;

        self.wal_writer.append_batch(seq, ops)?;
        self.seq = seq;

        for op in ops {
            match op {
                BatchOp::Put { key, value } => self.mem.put(key.clone(), value.clone(), seq),
                BatchOp::Del { key } => self.mem.delete(key.clone(), seq),
            }
        }

        if self.mem.approx_size() >= self.flush_threshold {
            if let Err(e) = self.flush() {
                warn!(seq, error = %e, "automatic flush failed; batch stays in WAL");
            }
        }

        Ok(seq)
    }

    /// Flushes the memtable to a new SSTable. No-op when it is empty.
    ///
    /// # Errors
    ///
    /// I/O failure during the SSTable write, manifest update or WAL truncation.
    pub fn force_flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    /// # Steps
    ///
    /// 1. Write `sst-{seq}-{timestamp_ms}.sst` (atomic temp + rename).
    /// 2. Record it in the manifest together with the current sequence.
    /// 3. Truncate the WAL and reopen the writer.
    /// 4. Clear the memtable and open the new table as the newest L0.
    /// 5. Compact if the L0 count reached the trigger.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();

        let sst_name = format!("sst-{:020}-{}.sst", self.seq, ts);
        let sst_path = self.sst_dir.join(&sst_name);

        SSTableWriter::write_from_memtable(&sst_path, &self.mem)?;

        self.manifest.add(sst_name, Level::L0);
        self.manifest.set_last_seq(self.seq);
        self.manifest.save()?;

        // table and manifest are durable; the WAL contents are now redundant
        let _f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)?;
        self.wal_writer = WalWriter::create(&self.wal_path, self.wal_sync)?;

        let entries = self.mem.len();
        self.mem.clear();

        let reader = SSTableReader::open(&sst_path)?;
        debug!(path = %sst_path.display(), entries, seq = self.seq, "flushed memtable");
        self.l0_sstables.insert(0, reader);

        if self.l0_compaction_trigger > 0 && self.l0_sstables.len() >= self.l0_compaction_trigger {
            info!(l0 = self.l0_sstables.len(), "L0 trigger reached, compacting");
            self.compact()?;
        }

        Ok(())
    }
}
