//! # Memtable
//!
//! Ordered in-memory buffer of the most recent writes.
//!
//! Every entry carries the sequence number of the batch that wrote it. All
//! operations of one atomic batch share a single sequence number, so an
//! entry is only replaced by a write with an **equal or higher** sequence:
//! equal means "later op in the same batch", higher means "later batch".
//! Strictly older writes (e.g. a WAL replayed over a fresher state) are
//! ignored.
//!
//! Deletes are kept as tombstones so they shadow older values in SSTables
//! until compaction drops them.
use std::collections::BTreeMap;
use std::ops::Bound;

/// Sequence number plus optional value. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    approx_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key -> value` written at `seq`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        let added = key.len() + value.len();
        self.insert(key, ValueEntry { seq, value: Some(value) }, added);
    }

    /// Records a tombstone for `key` written at `seq`.
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        let added = key.len();
        self.insert(key, ValueEntry { seq, value: None }, added);
    }

    fn insert(&mut self, key: Vec<u8>, entry: ValueEntry, added: usize) {
        match self.map.get(&key) {
            Some(old) if old.seq > entry.seq => return,
            Some(old) => {
                let removed = key.len() + old.value.as_ref().map_or(0, Vec::len);
                self.approx_size = self.approx_size.saturating_sub(removed);
            }
            None => {}
        }
        self.approx_size += added;
        self.map.insert(key, entry);
    }

    /// Live value for `key`, or `None` when missing or deleted.
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.map
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// Raw entry for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    /// `true` if the memtable holds any entry for `key`, tombstone or not.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Ordered iterator over every entry.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.map.iter()
    }

    /// Ordered iterator over `[start, end)`. An empty `end` means unbounded.
    pub fn range<'a>(
        &'a self,
        start: &[u8],
        end: &[u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a ValueEntry)> + 'a {
        // an inverted range collapses to the empty range [start, start)
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.max(start).to_vec())
        };
        self.map
            .range::<Vec<u8>, _>((Bound::Included(start.to_vec()), upper))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate footprint in bytes (keys plus live values).
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// Drops every entry, keeping the allocation for reuse after a flush.
    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
    }
}
