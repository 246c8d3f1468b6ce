//! Merge iterator over multiple [`SSTableReader`]s.
//!
//! Produces `(key, ValueEntry)` pairs in ascending key order. When a key
//! appears in several tables only the entry with the highest sequence number
//! is emitted. Compaction walks its inputs through this and streams the
//! result into a single new table.

use anyhow::{anyhow, Result};
use memtable::ValueEntry;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::SSTableReader;

/// `(key, source)` of a pending key; the value is read only once the key
/// reaches the top. Reversed so the smallest key, then lowest source, pops
/// first.
type Pending = Reverse<(Vec<u8>, usize)>;

type KeyIter<'a> = Box<dyn Iterator<Item = &'a [u8]> + 'a>;

/// Lazy k-way merge of SSTables; on duplicate keys the highest seq wins.
pub struct MergeIterator<'a> {
    readers: &'a [SSTableReader],
    key_iters: Vec<KeyIter<'a>>,
    heap: BinaryHeap<Pending>,
}

impl<'a> MergeIterator<'a> {
    pub fn new(readers: &'a [SSTableReader]) -> Self {
        let mut merge = Self {
            readers,
            key_iters: readers
                .iter()
                .map(|r| Box::new(r.keys()) as KeyIter<'a>)
                .collect(),
            heap: BinaryHeap::with_capacity(readers.len()),
        };
        for source in 0..readers.len() {
            merge.advance(source);
        }
        merge
    }

    fn advance(&mut self, source: usize) {
        if let Some(key) = self.key_iters[source].next() {
            self.heap.push(Reverse((key.to_vec(), source)));
        }
    }

    fn load(&self, key: &[u8], source: usize) -> Result<ValueEntry> {
        self.readers[source].get(key)?.ok_or_else(|| {
            anyhow!(
                "indexed key missing from {}",
                self.readers[source].path().display()
            )
        })
    }

    /// Next `(key, ValueEntry)` in key order, `None` once every source is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Any read or CRC failure in a source table.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        let Some(Reverse((key, source))) = self.heap.pop() else {
            return Ok(None);
        };
        let mut best = self.load(&key, source)?;
        self.advance(source);

        while self.heap.peek().is_some_and(|Reverse((k, _))| *k == key) {
            let Some(Reverse((_, dup))) = self.heap.pop() else {
                break;
            };
            let entry = self.load(&key, dup)?;
            if entry.seq > best.seq {
                best = entry;
            }
            self.advance(dup);
        }

        Ok(Some((key, best)))
    }

    /// Drains the remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
