use crate::{BatchOp, Engine};
use anyhow::Result;
use config::Config;
use std::fs;
use std::path::Path;

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}

/// Opens an engine with `wal.log` and `sst/` under `dir`.
pub fn open(dir: &Path, flush_threshold: usize) -> Result<Engine> {
    let cfg = Config::builder()
        .data_dir(dir)
        .flush_threshold(flush_threshold)
        .wal_sync(false)
        .build();
    Engine::open(&cfg)
}

pub fn put(engine: &mut Engine, key: &[u8], value: &[u8]) -> Result<u64> {
    engine.write(&[BatchOp::put(key, value)])
}

pub fn del(engine: &mut Engine, key: &[u8]) -> Result<u64> {
    engine.write(&[BatchOp::del(key)])
}
