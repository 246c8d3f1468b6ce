use anyhow::{anyhow, bail, Context, Result};
use bloom::BloomFilter;
use memtable::ValueEntry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::format::{decode_record, read_index_entry, Footer, FOOTER_BYTES};

/// Read handle for one SSTable.
///
/// [`open`](SSTableReader::open) loads the whole **index** (key → data
/// offset) and the bloom filter into memory. Point lookups then cost one seek
/// and one read; ordered range walks come straight from the in-memory index,
/// which is what lets the collection layer iterate one `(key, version)`
/// arena without touching unrelated keys.
///
/// The file handle sits behind a `Mutex` so `get` works through `&self`.
pub struct SSTableReader {
    path: PathBuf,
    index: BTreeMap<Vec<u8>, u64>,
    bloom: BloomFilter,
    file: Mutex<BufReader<File>>,
    footer: Footer,
}

impl SSTableReader {
    /// Opens an SSTable and loads its index and bloom filter.
    ///
    /// # Errors
    ///
    /// Fails on a bad footer (size, magic, offsets), an oversized index key,
    /// or any I/O error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf)?;

        let footer = Footer::read_from(&mut f)?;
        let filesize = f.metadata()?.len();

        f.seek(SeekFrom::Start(footer.bloom_offset))?;
        let bloom = BloomFilter::read_from(&mut f)?;

        f.seek(SeekFrom::Start(footer.index_offset))?;
        let index_end = filesize - FOOTER_BYTES;
        let mut index = BTreeMap::new();
        let mut rdr = BufReader::new(&mut f);
        let mut pos = footer.index_offset;
        while pos < index_end {
            let (key, offset, size) = read_index_entry(&mut rdr)
                .with_context(|| format!("corrupt index in {}", path_buf.display()))?;
            index.insert(key, offset);
            pos += size;
        }
        drop(rdr);

        if index.len() as u64 != footer.entry_count {
            bail!(
                "corrupt index in {}: {} keys, footer says {}",
                path_buf.display(),
                index.len(),
                footer.entry_count
            );
        }

        f.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path_buf,
            index,
            bloom,
            file: Mutex::new(BufReader::new(f)),
            footer,
        })
    }

    /// Point lookup.
    ///
    /// Returns `Ok(Some(entry))` when the key is in this table (possibly a
    /// tombstone), `Ok(None)` when it is not.
    ///
    /// # Errors
    ///
    /// I/O failure, CRC mismatch, or an index entry pointing at a different key.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }
        match self.index.get(key) {
            Some(&offset) => self.read_at(key, offset).map(Some),
            None => Ok(None),
        }
    }

    /// Reads and verifies the record at `offset`, which must hold `key`.
    fn read_at(&self, key: &[u8], offset: u64) -> Result<ValueEntry> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow!("lock poisoned: {e}"))?;
        f.seek(SeekFrom::Start(offset))?;
        let (stored_key, entry) = decode_record(&mut *f).with_context(|| {
            format!("reading {} at offset {offset}", self.path.display())
        })?;
        if stored_key != key {
            bail!("index pointed to mismatching key at offset {offset}");
        }
        Ok(entry)
    }

    /// Highest sequence number stored in this table.
    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(|k| k.as_slice())
    }

    /// Keys in `[start, end)` in ascending order. An empty `end` is unbounded.
    pub fn keys_in_range<'a>(
        &'a self,
        start: &[u8],
        end: &[u8],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.max(start).to_vec())
        };
        self.index
            .range::<Vec<u8>, _>((Bound::Included(start.to_vec()), upper))
            .map(|(k, _)| k.as_slice())
    }
}
