use super::helpers::{open, raw_count, Recorder};
use crate::codec::{key_subkey_range, namespace_range};
use crate::collector::{spawn, CollectorOptions, OrphanCollector};
use crate::metadata;
use anyhow::Result;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[test]
fn sweep_removes_orphans_of_deleted_keys() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.sadd(b"gone", &[b"a", b"b", b"c"])?;
    db.sadd(b"kept", &[b"x"])?;
    db.del(&[b"gone"])?;

    let stats = OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;
    assert_eq!(stats.orphans, 3);

    let (start, end) = key_subkey_range(1, b"gone");
    assert_eq!(raw_count(&storage, &start, &end)?, 0);
    assert!(db.sismember(b"kept", b"x")?);

    // a second sweep finds nothing
    let again = OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;
    assert_eq!(again.deleted(), 0);
    Ok(())
}

#[test]
fn steps_resume_from_cursor() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    let members: Vec<Vec<u8>> = (0..40).map(|i| format!("m{i:02}").into_bytes()).collect();
    let refs: Vec<&[u8]> = members.iter().map(|m| m.as_slice()).collect();
    db.sadd(b"s", &refs)?;
    db.sreplace(b"s", &[b"only"])?;

    let collector = OrphanCollector::new(&storage, CollectorOptions::default());
    let mut cursor = Vec::new();
    let mut steps = 0;
    let mut orphans = 0;
    loop {
        let step = collector.sweep_step(&cursor, 7)?;
        assert!(step.stats.scanned <= 7);
        orphans += step.stats.orphans;
        steps += 1;
        // a write between steps is fine
        db.sadd(b"other", &[format!("{steps}").as_bytes()])?;
        match step.next {
            Some(next) => cursor = next,
            None => break,
        }
    }
    assert!(steps > 5);
    assert_eq!(orphans, 40);
    assert_eq!(db.smembers(b"s")?, vec![b"only".to_vec()]);
    Ok(())
}

#[test]
fn active_expiry_removes_expired_records() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;

    db.hset(b"h", &[(b"f", b"v")])?;
    db.set(b"s", b"v")?;
    db.expire(b"h", 10)?;
    db.expire(b"s", 10)?;
    sleep(Duration::from_millis(30));

    let passive = CollectorOptions {
        active_expiry: false,
        ..CollectorOptions::default()
    };
    let stats = OrphanCollector::new(&storage, passive).sweep()?;
    assert_eq!(stats.expired, 0);
    assert_eq!(stats.orphans, 1, "expired hash fields are still reclaimable");
    assert!(metadata::get_raw(&storage, 1, b"s")?.is_some());

    let stats = OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;
    assert_eq!(stats.expired, 2);
    assert!(metadata::get_raw(&storage, 1, b"h")?.is_none());
    assert!(metadata::get_raw(&storage, 1, b"s")?.is_none());
    Ok(())
}

#[test]
fn retired_namespace_is_reclaimed() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    storage.db("other")?.hset(b"h", &[(b"a", b"1"), (b"b", b"2")])?;
    storage.db("default")?.set(b"keep", b"v")?;
    storage.retire_namespace("other")?;

    let stats = OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;
    assert_eq!(stats.retired, 3);
    let (start, end) = namespace_range(2);
    assert_eq!(raw_count(&storage, &start, &end)?, 0);
    assert_eq!(storage.db("default")?.get(b"keep")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn sweep_deletes_are_published() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let db = storage.db("default")?;
    db.sadd(b"s", &[b"a"])?;
    db.del(&[b"s"])?;

    let recorder = Arc::new(Recorder::default());
    storage.add_observer(recorder.clone());
    OrphanCollector::new(&storage, CollectorOptions::default()).sweep()?;

    let batches = recorder.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].ops.len(), 1);
    Ok(())
}

#[test]
fn background_collector_runs_and_stops() -> Result<()> {
    let dir = tempdir()?;
    let storage = Arc::new(open(dir.path())?);
    let db = storage.db("default")?;
    db.sadd(b"s", &[b"a", b"b"])?;
    db.del(&[b"s"])?;
    let (start, end) = key_subkey_range(1, b"s");

    let handle = spawn(
        storage.clone(),
        Duration::from_millis(10),
        CollectorOptions::default(),
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while raw_count(&storage, &start, &end)? > 0 && Instant::now() < deadline {
        sleep(Duration::from_millis(10));
    }
    handle.stop();

    assert_eq!(raw_count(&storage, &start, &end)?, 0);
    Ok(())
}
