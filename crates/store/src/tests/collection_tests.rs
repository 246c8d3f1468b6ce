use super::helpers::{open, raw_count};
use crate::codec::key_subkey_range;
use crate::{metadata, CollectorOptions, DataType, OrphanCollector, StoreError, FRAGMENT_BYTES};
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Hash ---------------------

#[test]
fn hash_basics() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.hset(b"h", &[(b"a", b"1"), (b"b", b"2")])?, 2);
    assert_eq!(db.hset(b"h", &[(b"b", b"3"), (b"c", b"4")])?, 1);
    assert_eq!(db.hlen(b"h")?, 3);
    assert_eq!(db.hget(b"h", b"b")?, Some(b"3".to_vec()));
    assert!(db.hexists(b"h", b"c")?);
    assert_eq!(db.hkeys(b"h")?, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(db.hvals(b"h")?, vec![b"1".to_vec(), b"3".to_vec(), b"4".to_vec()]);
    assert_eq!(
        db.hmget(b"h", &[b"a", b"zz"])?,
        vec![Some(b"1".to_vec()), None]
    );

    assert_eq!(db.hdel(b"h", &[b"a", b"zz", b"a"])?, 1);
    assert_eq!(db.hlen(b"h")?, 2);
    Ok(())
}

#[test]
fn duplicate_fields_in_one_call_count_once() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.hset(b"h", &[(b"f", b"1"), (b"f", b"2")])?, 1);
    assert_eq!(db.hlen(b"h")?, 1);
    assert_eq!(db.hget(b"h", b"f")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn hash_commit_is_one_batch() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    let before = storage.last_seq();
    db.hset(b"h", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")])?;
    assert_eq!(storage.last_seq(), before + 1);
    Ok(())
}

#[test]
fn hincr_replace_sweep_scenario() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.hset(b"user:1", &[(b"name", b"ann"), (b"visits", b"1")])?;
    assert_eq!(db.hincr_by(b"user:1", b"visits", 4)?, 5);
    assert_eq!(db.hincr_by(b"user:1", b"new", -2)?, -2);
    assert_eq!(db.hlen(b"user:1")?, 3);
    assert!(matches!(
        db.hincr_by(b"user:1", b"name", 1),
        Err(StoreError::InvalidArgument(_))
    ));

    let v1 = metadata::get_raw(&storage, 1, b"user:1")?.unwrap().version;
    assert_eq!(db.hreplace(b"user:1", &[(b"name", b"bob")])?, 1);
    let v2 = metadata::get_raw(&storage, 1, b"user:1")?.unwrap().version;
    assert!(v2 > v1);

    // old fields are invisible at once
    assert_eq!(db.hgetall(b"user:1")?, vec![(b"name".to_vec(), b"bob".to_vec())]);
    assert_eq!(db.hget(b"user:1", b"visits")?, None);

    let (start, end) = key_subkey_range(1, b"user:1");
    assert_eq!(raw_count(&storage, &start, &end)?, 4);

    let stats = OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;
    assert_eq!(stats.orphans, 3);
    assert_eq!(raw_count(&storage, &start, &end)?, 1);
    assert_eq!(db.hgetall(b"user:1")?, vec![(b"name".to_vec(), b"bob".to_vec())]);
    Ok(())
}

#[test]
fn versions_increase_across_replaces() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    let mut last = 0;
    for round in 0..20u8 {
        db.hreplace(b"h", &[(b"f", &[round][..])])?;
        let v = metadata::get_raw(&storage, 1, b"h")?.unwrap().version;
        assert!(v > last);
        last = v;
        db.del(&[b"h"])?;
    }
    Ok(())
}

#[test]
fn versions_increase_across_restart() -> Result<()> {
    let dir = tempdir()?;
    let before = {
        let storage = open(dir.path())?;
        storage.db("default")?.sadd(b"s", &[b"a"])?;
        metadata::get_raw(&storage, 1, b"s")?.unwrap().version
    };
    let storage = open(dir.path())?;
    let db = storage.db("default")?;
    db.sreplace(b"s", &[b"b"])?;
    let after = metadata::get_raw(&storage, 1, b"s")?.unwrap().version;
    assert!(after > before);
    Ok(())
}

#[test]
fn zero_count_boundary_vs_delete() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.sadd(b"s", &[b"only"])?;
    let version = metadata::get_raw(&storage, 1, b"s")?.unwrap().version;
    assert_eq!(db.srem(b"s", &[b"only"])?, 1);

    // the record stays with size 0 and reads as absent
    let raw = metadata::get_raw(&storage, 1, b"s")?.unwrap();
    assert_eq!(raw.size, 0);
    assert_eq!(raw.data_type, DataType::Set);
    assert_eq!(db.type_of(b"s")?, DataType::None);
    assert_eq!(db.exists(&[b"s"])?, 0);

    // a different type may take the key; it gets a newer version
    db.rpush(b"s", &[b"x"])?;
    let list = metadata::get_raw(&storage, 1, b"s")?.unwrap();
    assert_eq!(list.data_type, DataType::List);
    assert!(list.version > version);

    // del removes the record itself
    db.rpop(b"s")?;
    assert!(metadata::get_raw(&storage, 1, b"s")?.is_some());
    db.del(&[b"s"])?;
    assert!(metadata::get_raw(&storage, 1, b"s")?.is_none());
    Ok(())
}

// --------------------- List ---------------------

#[test]
fn list_push_pop_order() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.rpush(b"l", &[b"b", b"c"])?, 2);
    assert_eq!(db.lpush(b"l", &[b"a", b"z"])?, 4);
    assert_eq!(
        db.lrange(b"l", 0, -1)?,
        vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert_eq!(db.lpop(b"l")?, Some(b"z".to_vec()));
    assert_eq!(db.rpop(b"l")?, Some(b"c".to_vec()));
    assert_eq!(db.llen(b"l")?, 2);
    assert_eq!(db.lindex(b"l", -1)?, Some(b"b".to_vec()));
    assert_eq!(db.lindex(b"l", 5)?, None);
    Ok(())
}

#[test]
fn list_ranges_and_set() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.rpush(b"l", &[b"0", b"1", b"2", b"3", b"4"])?;
    assert_eq!(db.lrange(b"l", 1, 2)?, vec![b"1".to_vec(), b"2".to_vec()]);
    assert_eq!(db.lrange(b"l", -2, 100)?, vec![b"3".to_vec(), b"4".to_vec()]);
    assert!(db.lrange(b"l", 3, 1)?.is_empty());

    db.lset(b"l", -1, b"four")?;
    assert_eq!(db.lindex(b"l", 4)?, Some(b"four".to_vec()));
    assert!(matches!(db.lset(b"l", 9, b"x"), Err(StoreError::InvalidState(_))));
    assert!(matches!(db.lset(b"nope", 0, b"x"), Err(StoreError::InvalidState(_))));
    Ok(())
}

#[test]
fn ltrim_deletes_outside_slots() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.rpush(b"l", &[b"a", b"b", b"c", b"d", b"e"])?;
    db.ltrim(b"l", 1, 2)?;
    assert_eq!(db.lrange(b"l", 0, -1)?, vec![b"b".to_vec(), b"c".to_vec()]);

    let (start, end) = key_subkey_range(1, b"l");
    assert_eq!(raw_count(&storage, &start, &end)?, 2);

    db.ltrim(b"l", 5, 10)?;
    assert_eq!(db.llen(b"l")?, 0);
    assert_eq!(db.type_of(b"l")?, DataType::None);
    Ok(())
}

#[test]
fn emptied_list_restarts_fresh() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.rpush(b"l", &[b"a"])?;
    db.lpop(b"l")?;
    assert_eq!(db.lpop(b"l")?, None);
    db.lpush(b"l", &[b"b"])?;
    assert_eq!(db.lrange(b"l", 0, -1)?, vec![b"b".to_vec()]);

    assert_eq!(db.lreplace(b"l", &[b"x", b"y"])?, 2);
    assert_eq!(db.lrange(b"l", 0, -1)?, vec![b"x".to_vec(), b"y".to_vec()]);
    Ok(())
}

// --------------------- Set ---------------------

#[test]
fn set_basics() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.sadd(b"s", &[b"b", b"a", b"b"])?, 2);
    assert_eq!(db.sadd(b"s", &[b"a", b"c"])?, 1);
    assert_eq!(db.scard(b"s")?, 3);
    assert!(db.sismember(b"s", b"c")?);
    assert!(!db.sismember(b"s", b"z")?);
    assert_eq!(
        db.smembers(b"s")?,
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert_eq!(db.srem(b"s", &[b"a", b"z"])?, 1);
    assert_eq!(db.sreplace(b"s", &[b"q"])?, 1);
    assert_eq!(db.smembers(b"s")?, vec![b"q".to_vec()]);
    Ok(())
}

#[test]
fn set_ops_reject_other_types() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;
    db.set(b"k", b"v")?;

    assert!(matches!(db.sadd(b"k", &[b"m"]), Err(StoreError::TypeMismatch)));
    assert!(matches!(db.sreplace(b"k", &[b"m"]), Err(StoreError::TypeMismatch)));
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

// --------------------- Bitmap ---------------------

#[test]
fn bitmap_bits() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert!(!db.setbit(b"b", 7, true)?);
    assert!(db.setbit(b"b", 7, true)?);
    assert!(db.getbit(b"b", 7)?);
    assert!(!db.getbit(b"b", 6)?);

    // a bit in a later fragment
    let far = FRAGMENT_BYTES * 8 * 3 + 5;
    db.setbit(b"b", far, true)?;
    assert!(db.getbit(b"b", far)?);
    assert_eq!(db.bitcount(b"b")?, 2);

    assert!(db.setbit(b"b", 7, false)?);
    assert_eq!(db.bitcount(b"b")?, 1);

    let raw = metadata::get_raw(&storage, 1, b"b")?.unwrap();
    assert_eq!(raw.size as u64, far / 8 + 1);

    assert!(matches!(
        db.setbit(b"b", 1 << 32, true),
        Err(StoreError::InvalidArgument(_))
    ));
    Ok(())
}
