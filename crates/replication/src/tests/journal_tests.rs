use super::helpers::{config, put, retention};
use crate::{Journal, ReplicationEntry, ReplicationLog};
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use store::Storage;
use tempfile::tempdir;

fn entry(seq: u64) -> ReplicationEntry {
    ReplicationEntry::new(seq, vec![put(&format!("k{seq}"), "value")], 1_700_000_000_000 + seq)
}

fn seqs(entries: &[ReplicationEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.seq).collect()
}

fn segment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|d| d.map(|d| d.path()))
        .collect::<Result<_, _>>()?;
    files.sort();
    Ok(files)
}

#[test]
fn entries_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let (mut journal, loaded) = Journal::open(dir.path(), false)?;
        assert!(loaded.is_empty());
        for seq in 1..=10 {
            journal.append(&entry(seq))?;
        }
    }

    let (_, loaded) = Journal::open(dir.path(), false)?;
    assert_eq!(loaded.len(), 10);
    assert_eq!(loaded[3], entry(4));
    assert_eq!(seqs(&loaded), (1..=10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn torn_tail_is_cut_back() -> Result<()> {
    let dir = tempdir()?;
    {
        let (mut journal, _) = Journal::open(dir.path(), false)?;
        for seq in 1..=5 {
            journal.append(&entry(seq))?;
        }
    }
    let segment = segment_files(dir.path())?.remove(0);
    let intact_len = fs::metadata(&segment)?.len();
    // a length prefix promising more than follows
    OpenOptions::new()
        .append(true)
        .open(&segment)?
        .write_all(&[200, 0, 0, 0, 1, 2, 3, 4, 5])?;

    let (mut journal, loaded) = Journal::open(dir.path(), false)?;
    assert_eq!(seqs(&loaded), vec![1, 2, 3, 4, 5]);
    assert_eq!(fs::metadata(&segment)?.len(), intact_len);

    journal.append(&entry(6))?;
    drop(journal);
    let (_, loaded) = Journal::open(dir.path(), false)?;
    assert_eq!(seqs(&loaded), vec![1, 2, 3, 4, 5, 6]);
    Ok(())
}

#[test]
fn damage_drops_everything_after_it() -> Result<()> {
    let dir = tempdir()?;
    let segment_bytes = entry(1).encoded_len() as u64 * 4;
    {
        let (mut journal, _) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
        for seq in 1..=20 {
            journal.append(&entry(seq))?;
        }
        assert!(journal.segment_count() >= 3);
    }

    let files = segment_files(dir.path())?;
    let mut bytes = fs::read(&files[1])?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&files[1], bytes)?;

    let (journal, loaded) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
    let kept = seqs(&loaded);
    assert_eq!(kept, (1..=kept.len() as u64).collect::<Vec<_>>());
    assert!(kept.len() > 1 && kept.len() < 20);
    assert_eq!(journal.segment_count(), 2);
    assert_eq!(segment_files(dir.path())?.len(), 2);
    Ok(())
}

#[test]
fn pruning_removes_whole_segments_below_the_floor() -> Result<()> {
    let dir = tempdir()?;
    let segment_bytes = entry(1).encoded_len() as u64 * 5;
    let (mut journal, _) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
    for seq in 1..=30 {
        journal.append(&entry(seq))?;
    }
    let before = journal.segment_count();

    journal.truncate_front(18)?;
    assert!(journal.segment_count() < before);
    drop(journal);

    let (mut journal, loaded) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
    let first = loaded[0].seq;
    assert!(first > 1 && first <= 18, "first kept entry is {first}");
    assert_eq!(seqs(&loaded), (first..=30).collect::<Vec<_>>());

    // the active segment is never removed
    journal.truncate_front(1_000)?;
    assert_eq!(journal.segment_count(), 1);
    Ok(())
}

#[test]
fn log_retention_prunes_the_journal() -> Result<()> {
    let dir = tempdir()?;
    let segment_bytes = entry(1).encoded_len() as u64 * 2;
    let (journal, _) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
    let log = ReplicationLog::with_journal(0, retention(4), Some(journal));
    for seq in 1..=40 {
        log.publish(entry(seq));
    }
    assert_eq!(log.status().retention_floor, 37);
    drop(log);

    let (_, loaded) = Journal::with_segment_bytes(dir.path(), false, segment_bytes)?;
    let first = loaded[0].seq;
    assert!(first > 30 && first <= 37, "first kept entry is {first}");
    assert_eq!(seqs(&loaded), (first..=40).collect::<Vec<_>>());
    assert!(segment_files(dir.path())?.len() <= 4);
    Ok(())
}

#[test]
fn journal_ahead_of_the_store_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    let cfg = config(dir.path());
    {
        let storage = Storage::open(&cfg)?;
        let _log = ReplicationLog::open(&storage, &cfg)?;
        let db = storage.db("default")?;
        for i in 0..5 {
            db.set(format!("k{i}").as_bytes(), b"v")?;
        }
    }
    // the store loses its data, the journal does not
    fs::remove_file(cfg.wal_path())?;
    fs::remove_dir_all(cfg.sst_dir())?;

    let storage = Storage::open(&cfg)?;
    let log = ReplicationLog::open(&storage, &cfg)?;
    let status = log.status();
    assert_eq!(status.last_published, storage.last_seq());
    assert_eq!(status.retained_entries, 0);
    assert!(segment_files(&cfg.repl_dir())?.is_empty());

    storage.db("default")?.set(b"fresh", b"1")?;
    assert_eq!(log.status().retained_entries, 1);
    Ok(())
}
