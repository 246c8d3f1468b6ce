use crate::{FetchLimits, Follower, Producer, ReplicationLog};
use anyhow::Result;
use config::{Config, RetentionPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use store::{BatchOp, Storage};

pub fn config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .wal_sync(false)
        .namespace("other", 2)
        .build()
}

pub fn open(dir: &Path) -> Result<Arc<Storage>> {
    Ok(Arc::new(Storage::open(&config(dir))?))
}

pub fn retention(max_entries: usize) -> RetentionPolicy {
    RetentionPolicy {
        max_entries,
        ..RetentionPolicy::default()
    }
}

/// A producer over `storage` with its log attached.
pub fn producer(storage: &Arc<Storage>, policy: RetentionPolicy) -> Arc<Producer> {
    let log = ReplicationLog::attach(storage, policy);
    Arc::new(Producer::with_limits(
        Arc::clone(storage),
        log,
        FetchLimits::default(),
    ))
}

pub fn follower(storage: &Arc<Storage>) -> Result<Follower> {
    Ok(Follower::new(Arc::clone(storage), &config(Path::new("unused")))?
        .with_max_wait(Duration::ZERO))
}

/// The whole dataset as one chunk, with the sequence it was read at.
pub fn full_snapshot(storage: &Storage) -> Result<(u64, Vec<(Vec<u8>, Vec<u8>)>)> {
    let chunk = storage.snapshot_chunk(b"", usize::MAX, usize::MAX)?;
    Ok((chunk.seq, chunk.pairs))
}

/// Everything outside the system area, in key order.
pub fn user_data(storage: &Storage) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    Ok(storage.scan(&[0, 1], b"")?)
}

pub fn put(key: &str, value: &str) -> BatchOp {
    BatchOp::put(key.as_bytes(), value.as_bytes())
}
