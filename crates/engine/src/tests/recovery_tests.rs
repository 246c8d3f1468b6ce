use super::helpers::{del, open, put};
use crate::*;
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

#[test]
fn recovery_from_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        engine.write(&[BatchOp::put(b"a", b"1"), BatchOp::put(b"b", b"2")])?;
        del(&mut engine, b"a")?;
        // skip the flush-on-drop so recovery has to use the WAL
        std::mem::forget(engine);
    }

    let engine = open(dir.path(), 1024 * 1024)?;
    assert!(engine.get(b"a")?.is_none());
    assert_eq!(engine.get(b"b")?, Some((1, b"2".to_vec())));
    assert_eq!(engine.seq(), 2, "two batches");
    Ok(())
}

#[test]
fn drop_flushes_memtable() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        put(&mut engine, b"k", b"v")?;
    }
    let engine = open(dir.path(), 1024 * 1024)?;
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_len(), 0);
    assert_eq!(engine.get(b"k")?.unwrap().1, b"v".to_vec());
    Ok(())
}

#[test]
fn recovery_combines_wal_and_sstables() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1)?;
        put(&mut engine, b"flushed", b"in_sst")?;
    }
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        put(&mut engine, b"in_wal", b"pending")?;
        std::mem::forget(engine);
    }

    let engine = open(dir.path(), 1024 * 1024)?;
    assert_eq!(engine.get(b"flushed")?.unwrap().1, b"in_sst".to_vec());
    assert_eq!(engine.get(b"in_wal")?, Some((2, b"pending".to_vec())));
    assert_eq!(engine.seq(), 2);
    Ok(())
}

#[test]
fn torn_last_batch_is_absent_after_restart() -> Result<()> {
    let dir = tempdir()?;
    let wal_path = dir.path().join("wal.log");
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        put(&mut engine, b"kept", b"1")?;
        std::mem::forget(engine);
    }
    let intact_len = std::fs::metadata(&wal_path)?.len();
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        engine.write(&[BatchOp::put(b"meta", b"v2"), BatchOp::put(b"field", b"x")])?;
        std::mem::forget(engine);
    }
    // cut the second frame in half
    let full_len = std::fs::metadata(&wal_path)?.len();
    let f = OpenOptions::new().write(true).open(&wal_path)?;
    f.set_len(intact_len + (full_len - intact_len) / 2)?;
    drop(f);

    let engine = open(dir.path(), 1024 * 1024)?;
    assert!(engine.get(b"kept")?.is_some());
    assert!(engine.get(b"meta")?.is_none());
    assert!(engine.get(b"field")?.is_none());
    assert_eq!(engine.seq(), 1);
    Ok(())
}

#[test]
fn sequence_survives_compacted_away_tombstone() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        engine.set_l0_compaction_trigger(0);
        put(&mut engine, b"a", b"1")?;
        engine.force_flush()?;
        put(&mut engine, b"b", b"2")?;
        engine.force_flush()?;
        // seq 3 lives only in a tombstone
        del(&mut engine, b"b")?;
        engine.force_flush()?;
        engine.compact()?;
        assert_eq!(engine.seq(), 3);
    }

    let engine = open(dir.path(), 1024 * 1024)?;
    assert_eq!(engine.seq(), 3, "sequence must not move backwards");
    assert!(engine.get(b"b")?.is_none());
    Ok(())
}

#[test]
fn stale_tmp_files_are_removed() -> Result<()> {
    let dir = tempdir()?;
    let sst_dir = dir.path().join("sst");
    std::fs::create_dir_all(&sst_dir)?;
    let tmp = sst_dir.join("sst-1-1.sst.tmp");
    std::fs::File::create(&tmp)?.write_all(b"partial")?;

    let _engine = open(dir.path(), 1024 * 1024)?;
    assert!(!tmp.exists());
    Ok(())
}

#[test]
fn tables_without_manifest_are_loaded_as_l0() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        engine.set_l0_compaction_trigger(0);
        put(&mut engine, b"x", b"1")?;
        engine.force_flush()?;
        put(&mut engine, b"y", b"2")?;
        engine.force_flush()?;
    }
    std::fs::remove_file(dir.path().join("sst").join("MANIFEST"))?;

    let engine = open(dir.path(), 1024 * 1024)?;
    assert_eq!(engine.l0_sstable_count(), 2);
    assert_eq!(engine.seq(), 2);
    assert!(dir.path().join("sst").join("MANIFEST").exists(), "manifest is rebuilt");
    Ok(())
}

#[test]
fn open_from_config() -> Result<()> {
    let dir = tempdir()?;
    let cfg = config::Config::builder()
        .data_dir(dir.path().join("data"))
        .flush_threshold(1)
        .wal_sync(false)
        .l0_compaction_trigger(0)
        .build();
    {
        let mut engine = Engine::open(&cfg)?;
        assert_eq!(engine.l0_compaction_trigger(), 0);
        put(&mut engine, b"k", b"v")?;
        assert_eq!(engine.l0_sstable_count(), 1);
    }
    assert!(cfg.sst_dir().join("MANIFEST").exists());
    assert!(cfg.wal_path().exists());
    Ok(())
}
