use super::helpers::{count_sst_files, del, open, put};
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn compact_merges_and_keeps_newest() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    engine.set_l0_compaction_trigger(0);

    for round in 0..3u8 {
        for i in 0..20u8 {
            put(&mut engine, &[b'k', i], &[round])?;
        }
        engine.force_flush()?;
    }
    assert_eq!(engine.l0_sstable_count(), 3);

    engine.compact()?;
    assert_eq!(engine.l0_sstable_count(), 0);
    assert_eq!(engine.l1_sstable_count(), 1);
    assert_eq!(count_sst_files(&dir.path().join("sst")), 1);

    for i in 0..20u8 {
        assert_eq!(engine.get(&[b'k', i])?.unwrap().1, vec![2]);
    }
    Ok(())
}

#[test]
fn compact_drops_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    engine.set_l0_compaction_trigger(0);

    put(&mut engine, b"live", b"1")?;
    put(&mut engine, b"dead", b"1")?;
    engine.force_flush()?;
    del(&mut engine, b"dead")?;
    engine.force_flush()?;

    engine.compact()?;
    assert!(engine.get(b"dead")?.is_none());
    assert_eq!(engine.scan(b"", b"")?.len(), 1);
    assert_eq!(engine.scan_bounded(b"", b"", 10)?.pairs.len(), 1);
    Ok(())
}

#[test]
fn compact_everything_deleted_leaves_no_tables() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    engine.set_l0_compaction_trigger(0);

    put(&mut engine, b"a", b"1")?;
    engine.force_flush()?;
    del(&mut engine, b"a")?;
    engine.force_flush()?;

    engine.compact()?;
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(count_sst_files(&dir.path().join("sst")), 0);
    assert!(engine.get(b"a")?.is_none());

    // still writable, and sequence keeps counting
    assert_eq!(put(&mut engine, b"b", b"2")?, 3);
    Ok(())
}

#[test]
fn compact_single_table_is_no_op() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1024 * 1024)?;
    put(&mut engine, b"a", b"1")?;
    engine.force_flush()?;
    engine.compact()?;
    assert_eq!(engine.l0_sstable_count(), 1);
    assert_eq!(engine.l1_sstable_count(), 0);
    Ok(())
}

#[test]
fn compaction_result_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open(dir.path(), 1024 * 1024)?;
        engine.set_l0_compaction_trigger(0);
        for i in 0..5u8 {
            put(&mut engine, &[i], b"v")?;
            engine.force_flush()?;
        }
        engine.compact()?;
        put(&mut engine, b"late", b"v")?;
        engine.force_flush()?;
    }

    let engine = open(dir.path(), 1024 * 1024)?;
    assert_eq!(engine.l1_sstable_count(), 1);
    assert_eq!(engine.l0_sstable_count(), 1);
    assert_eq!(engine.scan(b"", b"")?.len(), 6);
    assert_eq!(engine.seq(), 6);
    Ok(())
}
