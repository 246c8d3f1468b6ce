use super::helpers::open;
use crate::{DataType, StoreError};
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn set_get_and_overwrite() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.get(b"k")?, None);
    db.set(b"k", b"v1")?;
    db.set(b"k", b"v2")?;
    assert_eq!(db.get(b"k")?, Some(b"v2".to_vec()));
    assert_eq!(db.strlen(b"k")?, 2);
    Ok(())
}

#[test]
fn set_replaces_a_collection() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.hset(b"k", &[(b"f", b"v")])?;
    db.set(b"k", b"plain")?;
    assert_eq!(db.type_of(b"k")?, DataType::String);
    assert!(matches!(db.hget(b"k", b"f"), Err(StoreError::TypeMismatch)));
    Ok(())
}

#[test]
fn get_on_wrong_type_fails_without_mutation() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.rpush(b"list", &[b"a"])?;
    let seq = storage.last_seq();
    assert!(matches!(db.get(b"list"), Err(StoreError::TypeMismatch)));
    assert!(matches!(db.append(b"list", b"x"), Err(StoreError::TypeMismatch)));
    assert!(matches!(db.incr_by(b"list", 1), Err(StoreError::TypeMismatch)));
    assert_eq!(storage.last_seq(), seq, "nothing committed");
    Ok(())
}

#[test]
fn set_nx_and_get_set() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert!(db.set_nx(b"k", b"first")?);
    assert!(!db.set_nx(b"k", b"second")?);
    assert_eq!(db.get_set(b"k", b"third")?, Some(b"first".to_vec()));
    assert_eq!(db.get(b"k")?, Some(b"third".to_vec()));
    assert_eq!(db.get_set(b"new", b"x")?, None);
    Ok(())
}

#[test]
fn append_and_incr() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    assert_eq!(db.append(b"s", b"ab")?, 2);
    assert_eq!(db.append(b"s", b"cd")?, 4);
    assert_eq!(db.get(b"s")?, Some(b"abcd".to_vec()));

    assert_eq!(db.incr_by(b"n", 5)?, 5);
    assert_eq!(db.incr_by(b"n", -7)?, -2);
    assert!(matches!(db.incr_by(b"s", 1), Err(StoreError::InvalidArgument(_))));

    db.set(b"max", i64::MAX.to_string().as_bytes())?;
    assert!(matches!(db.incr_by(b"max", 1), Err(StoreError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn ttl_on_strings() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.set_with_ttl(b"k", b"v", 60_000)?;
    let ttl = db.ttl(b"k")?;
    assert!(ttl > 0 && ttl <= 60_000);

    // append keeps the expiry, set clears it
    db.append(b"k", b"w")?;
    assert!(db.ttl(b"k")? > 0);
    db.set(b"k", b"fresh")?;
    assert_eq!(db.ttl(b"k")?, -1);

    assert!(matches!(
        db.set_with_ttl(b"k", b"v", 0),
        Err(StoreError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn mset_is_one_batch() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;
    db.rpush(b"list", &[b"x"])?;

    let before = storage.last_seq();
    db.mset(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")])?;
    assert_eq!(storage.last_seq(), before + 1);

    let values = db.mget(&[b"a", b"missing", b"c", b"list"])?;
    assert_eq!(
        values,
        vec![Some(b"1".to_vec()), None, Some(b"3".to_vec()), None]
    );
    Ok(())
}

#[test]
fn strings_survive_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let storage = open(dir.path())?;
        storage.db("default")?.set(b"k", b"durable")?;
    }
    let storage = open(dir.path())?;
    assert_eq!(storage.db("default")?.get(b"k")?, Some(b"durable".to_vec()));
    Ok(())
}
