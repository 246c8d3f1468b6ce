//! Read path: `get()`, `scan()` and `scan_bounded()`.
//!
//! Point lookups check the memtable, then L0 (newest first, may overlap),
//! then L1. The first match wins and tombstones shadow older values.
//!
//! Range reads merge every source, keep the highest sequence per key and drop
//! tombstones. Only keys inside the requested range are touched in each
//! SSTable, through the reader's in-memory index.
use anyhow::Result;
use memtable::ValueEntry;
use sstable::SSTableReader;
use std::collections::BTreeMap;

use crate::Engine;

/// One page of a bounded scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Live pairs in ascending key order.
    pub pairs: Vec<(Vec<u8>, Vec<u8>)>,
    /// Where the next page starts, or `None` when the range is exhausted.
    pub next: Option<Vec<u8>>,
}

/// Keeps the entry with the highest sequence number per key.
fn merge_entry(merged: &mut BTreeMap<Vec<u8>, ValueEntry>, key: &[u8], entry: ValueEntry) {
    match merged.get(key) {
        Some(existing) if existing.seq >= entry.seq => {}
        _ => {
            merged.insert(key.to_vec(), entry);
        }
    }
}

/// Merges up to `limit` keys of `sst` in `[start, end)` into `merged`.
/// Returns `true` when the table had more keys in range than it contributed.
fn merge_table(
    merged: &mut BTreeMap<Vec<u8>, ValueEntry>,
    sst: &SSTableReader,
    start: &[u8],
    end: &[u8],
    limit: usize,
) -> Result<bool> {
    let mut keys = sst.keys_in_range(start, end);
    for key in keys.by_ref().take(limit) {
        if let Some(entry) = sst.get(key)? {
            merge_entry(merged, key, entry);
        }
    }
    Ok(keys.next().is_some())
}

impl Engine {
    /// Looks up a key, returning `Some((seq, value))` if it is live.
    ///
    /// # Errors
    ///
    /// Any SSTable read failure (corruption, I/O).
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>> {
        if let Some(entry) = self.mem.get_entry(key) {
            return Ok(entry.value.as_ref().map(|v| (entry.seq, v.clone())));
        }

        for sst in self.l0_sstables.iter().chain(self.l1_sstables.iter()) {
            if let Some(entry) = sst.get(key)? {
                // a tombstone hides older values
                return Ok(entry.value.map(|v| (entry.seq, v)));
            }
        }

        Ok(None)
    }

    /// Returns every live pair in `[start, end)` in ascending key order.
    ///
    /// `start = b""` scans from the beginning, `end = b""` to the end.
    ///
    /// # Errors
    ///
    /// Any SSTable read failure.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan_bounded(start, end, usize::MAX)?.pairs)
    }

    /// Like [`scan`](Engine::scan) but looks at no more than `limit` distinct
    /// keys (live or deleted) and returns a resume cursor.
    ///
    /// The returned page may hold fewer than `limit` pairs when tombstones
    /// were skipped; a `Some` cursor still means there may be more.
    ///
    /// # Errors
    ///
    /// Any SSTable read failure.
    pub fn scan_bounded(&self, start: &[u8], end: &[u8], limit: usize) -> Result<ScanPage> {
        if limit == 0 {
            return Ok(ScanPage {
                pairs: Vec::new(),
                next: Some(start.to_vec()),
            });
        }

        // The first `limit` keys of the merged view are always among the
        // first `limit` keys of each source, so each source is cut there.
        let mut merged: BTreeMap<Vec<u8>, ValueEntry> = BTreeMap::new();
        let mut truncated = false;

        let mut mem_iter = self.mem.range(start, end);
        for (key, entry) in mem_iter.by_ref().take(limit) {
            merge_entry(&mut merged, key, entry.clone());
        }
        truncated |= mem_iter.next().is_some();

        for sst in self.l0_sstables.iter().chain(self.l1_sstables.iter()) {
            truncated |= merge_table(&mut merged, sst, start, end, limit)?;
        }

        let more = truncated || merged.len() > limit;
        let mut pairs = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;
        for (key, entry) in merged.into_iter().take(limit) {
            if let Some(v) = entry.value {
                pairs.push((key.clone(), v));
            }
            last_key = Some(key);
        }

        let next = match (more, last_key) {
            (true, Some(mut k)) => {
                // smallest key strictly greater than the last one seen
                k.push(0);
                Some(k)
            }
            _ => None,
        };

        Ok(ScanPage { pairs, next })
    }
}
