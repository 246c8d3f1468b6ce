use crate::{CommitObserver, CommittedBatch, Storage};
use anyhow::Result;
use config::Config;
use parking_lot::Mutex;
use std::path::Path;

/// Config with namespaces `default` (0x0001) and `other` (0x0002).
pub fn config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .wal_sync(false)
        .namespace("other", 2)
        .build()
}

pub fn open(dir: &Path) -> Result<Storage> {
    Ok(Storage::open(&config(dir))?)
}

/// Records every committed batch.
#[derive(Default)]
pub struct Recorder {
    pub batches: Mutex<Vec<CommittedBatch>>,
}

impl CommitObserver for Recorder {
    fn on_commit(&self, batch: &CommittedBatch) {
        self.batches.lock().push(batch.clone());
    }
}

/// Number of raw engine keys under `[start, end)`.
pub fn raw_count(storage: &Storage, start: &[u8], end: &[u8]) -> Result<usize> {
    Ok(storage.scan(start, end)?.len())
}
