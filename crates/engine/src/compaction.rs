//! Compaction: merges all L0 + L1 SSTables into a single L1 SSTable.
//!
//! Streams through [`MergeIterator`] into [`SSTableWriter`], so memory stays
//! bounded by the bloom filter and index rather than the data. Because the
//! output covers every table, nothing older can remain for a tombstone to
//! shadow, and tombstones are dropped.
use anyhow::Result;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::{Engine, MergeIterator, SSTableReader, SSTableWriter};

impl Engine {
    /// Compacts every SSTable into one L1 table.
    ///
    /// Runs automatically when the L0 count reaches the trigger after a flush,
    /// or manually. A no-op with fewer than two tables.
    ///
    /// # Errors
    ///
    /// I/O or corruption during merge, write, or manifest update. On error the
    /// input tables stay in place.
    pub fn compact(&mut self) -> Result<()> {
        let total = self.l0_sstables.len() + self.l1_sstables.len();
        if total <= 1 {
            return Ok(());
        }

        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        let sst_name = format!("sst-{:020}-{}-c.sst", self.seq, ts);
        let sst_path = self.sst_dir.join(&sst_name);

        let mut inputs: Vec<SSTableReader> = std::mem::take(&mut self.l0_sstables);
        let l1_start = inputs.len();
        inputs.append(&mut self.l1_sstables);

        let old_paths: Vec<PathBuf> = inputs
            .iter()
            .map(|r| r.path().to_path_buf())
            .filter(|p| *p != sst_path)
            .collect();
        let estimated_count: usize = inputs.iter().map(|r| r.len()).sum();

        let mut merge_error: Option<anyhow::Error> = None;
        let mut kept = 0usize;
        let mut dropped = 0usize;
        let write_result = {
            let mut merge = MergeIterator::new(&inputs);
            let streaming_iter = std::iter::from_fn(|| loop {
                match merge.next_entry() {
                    Ok(Some((key, entry))) => {
                        if entry.value.is_none() {
                            dropped += 1;
                            continue;
                        }
                        kept += 1;
                        return Some((key, entry));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        merge_error = Some(e);
                        return None;
                    }
                }
            });
            SSTableWriter::write_from_iterator(&sst_path, estimated_count, streaming_iter)
        };

        let failure = match (merge_error, write_result) {
            (Some(e), _) => Some(e),
            (None, Err(e)) if kept > 0 => Some(e),
            _ => None,
        };
        if let Some(e) = failure {
            let _ = std::fs::remove_file(sst_path.with_extension("sst.tmp"));
            let _ = std::fs::remove_file(&sst_path);
            // put the inputs back where they were
            self.l1_sstables = inputs.split_off(l1_start);
            self.l0_sstables = inputs;
            return Err(e);
        }

        // nothing kept: the store is now just the memtable
        self.manifest
            .replace_all((kept > 0).then_some(sst_name));
        self.manifest.set_last_seq(self.seq);
        self.manifest.save()?;

        // release file handles before deleting
        drop(inputs);
        for p in &old_paths {
            if let Err(e) = std::fs::remove_file(p) {
                warn!(path = %p.display(), error = %e, "could not remove compacted table");
            }
        }

        if kept > 0 {
            self.l1_sstables = vec![SSTableReader::open(&sst_path)?];
        }

        info!(inputs = total, kept, tombstones_dropped = dropped, "compaction finished");
        Ok(())
    }
}
