use super::sample_memtable;
use crate::*;
use anyhow::Result;
use memtable::{Memtable, ValueEntry};
use tempfile::tempdir;

#[test]
fn write_empty_memtable_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.sst");
    let result = SSTableWriter::write_from_memtable(&path, &Memtable::new());
    assert!(result.unwrap_err().to_string().contains("empty"));
    assert!(!path.exists(), "no .sst file for an empty memtable");
    assert!(!path.with_extension("sst.tmp").exists());
}

#[test]
fn write_empty_iterator_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.sst");
    let result = SSTableWriter::write_from_iterator(&path, 10, std::iter::empty());
    assert!(result.is_err());
    assert!(!path.exists());
    assert!(!path.with_extension("sst.tmp").exists());
}

#[test]
fn footer_describes_written_table() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("test.sst");
    SSTableWriter::write_from_memtable(&path, &sample_memtable())?;

    let mut f = std::fs::File::open(&path)?;
    let filesize = f.metadata()?.len();
    let footer = Footer::read_from(&mut f)?;

    assert_eq!(footer.max_seq, 4);
    assert_eq!(footer.entry_count, 4);
    assert!(footer.bloom_offset < footer.index_offset);
    assert!(footer.index_offset < filesize - FOOTER_BYTES);
    Ok(())
}

#[test]
fn write_from_iterator_streams_entries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("stream.sst");

    let entries = (0..50u64).map(|i| {
        (
            format!("k{:03}", i).into_bytes(),
            ValueEntry {
                seq: i + 10,
                value: if i % 7 == 0 { None } else { Some(vec![i as u8]) },
            },
        )
    });
    // under-estimated count only affects bloom sizing
    SSTableWriter::write_from_iterator(&path, 5, entries)?;

    let reader = SSTableReader::open(&path)?;
    assert_eq!(reader.len(), 50);
    assert_eq!(reader.max_seq(), 59);
    assert_eq!(reader.get(b"k000")?.unwrap().value, None);
    assert_eq!(reader.get(b"k001")?.unwrap().value, Some(vec![1]));
    Ok(())
}

#[test]
fn rewrite_replaces_existing_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("replace.sst");

    let mut first = Memtable::new();
    first.put(b"x".to_vec(), b"old".to_vec(), 1);
    SSTableWriter::write_from_memtable(&path, &first)?;

    let mut second = Memtable::new();
    second.put(b"y".to_vec(), b"new".to_vec(), 2);
    SSTableWriter::write_from_memtable(&path, &second)?;

    let reader = SSTableReader::open(&path)?;
    assert!(reader.get(b"x")?.is_none());
    assert_eq!(reader.get(b"y")?.unwrap().value, Some(b"new".to_vec()));
    Ok(())
}
