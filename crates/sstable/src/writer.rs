use anyhow::{bail, Result};
use bloom::BloomFilter;
use memtable::{Memtable, ValueEntry};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use crate::format::{encode_record, write_index_entry, Footer};

/// Target false-positive rate of each table's bloom filter.
const BLOOM_FPR: f64 = 0.01;

/// Writes sorted `(key, ValueEntry)` streams to immutable SSTable files.
///
/// Output goes to `<path>.tmp`, is fsynced, then renamed into place, so a
/// crash never leaves a half-written table under its final name.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` to a new table at `path`.
    ///
    /// # Errors
    ///
    /// An empty memtable, or any I/O error.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<()> {
        if mem.is_empty() {
            bail!("refusing to write an empty SSTable (empty memtable)");
        }
        let entries = mem.iter().map(|(k, v)| (k.to_vec(), v.clone()));
        Self::write_from_iterator(path, mem.len(), entries)
    }

    /// Streams an already sorted, deduplicated iterator into a table. Memory
    /// stays proportional to the bloom filter and index, not the data.
    /// `expected_count` only sizes the bloom filter.
    ///
    /// # Errors
    ///
    /// An iterator that yields nothing, or any I/O error.
    pub fn write_from_iterator<I>(path: &Path, expected_count: usize, entries: I) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let result = write_table(&tmp_path, expected_count.max(1), entries);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;

        fs::rename(&tmp_path, path)?;
        // make the rename itself durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

fn write_table<I>(tmp_path: &Path, expected_count: usize, entries: I) -> Result<()>
where
    I: Iterator<Item = (Vec<u8>, ValueEntry)>,
{
    let mut file = BufWriter::new(File::create(tmp_path)?);
    let mut bloom = BloomFilter::new(expected_count, BLOOM_FPR);
    let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
    let mut max_seq = 0u64;
    let mut record = Vec::with_capacity(256);

    for (key, entry) in entries {
        max_seq = max_seq.max(entry.seq);
        record.clear();
        encode_record(&mut record, &key, &entry)?;

        let offset = file.stream_position()?;
        file.write_all(&record)?;
        bloom.insert(&key);
        index.push((key, offset));
    }
    if index.is_empty() {
        bail!("refusing to write an empty SSTable (no entries)");
    }

    let bloom_offset = file.stream_position()?;
    bloom.write_to(&mut file)?;

    let index_offset = file.stream_position()?;
    for (key, offset) in &index {
        write_index_entry(&mut file, key, *offset)?;
    }

    Footer {
        max_seq,
        entry_count: index.len() as u64,
        bloom_offset,
        index_offset,
    }
    .write_to(&mut file)?;

    file.into_inner()?.sync_all()?;
    Ok(())
}
