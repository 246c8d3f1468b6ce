//! Cold start: rebuilding an [`Engine`] from what is on disk.
//!
//! 1. Remove `.sst.tmp` leftovers from interrupted flushes.
//! 2. Replay the WAL into a fresh memtable.
//! 3. Load tables from the manifest, or adopt every table on disk as L0
//!    when the manifest is missing.
//! 4. Resume the sequence from the highest of WAL, tables and manifest.

use anyhow::{Context, Result};
use config::Config;
use memtable::Memtable;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use wal::{BatchOp, WalError, WalReader, WalWriter};

use crate::manifest::{Level, Manifest};
use crate::{Engine, SSTableReader};

impl Engine {
    /// Opens the engine under `cfg.data_dir` (`wal.log` and `sst/`).
    pub fn open(cfg: &Config) -> Result<Self> {
        let wal_path = cfg.wal_path();
        let sst_dir = cfg.sst_dir();
        std::fs::create_dir_all(&sst_dir)
            .with_context(|| format!("creating {}", sst_dir.display()))?;
        remove_tmp_tables(&sst_dir);

        // replay before opening the writer so the file is not shared
        let mut mem = Memtable::new();
        let wal_seq = replay_wal(&wal_path, &mut mem)?;
        let wal_writer = WalWriter::create(&wal_path, cfg.wal_sync)?;

        let mut manifest = Manifest::load_or_create(&sst_dir)?;
        let adopt = manifest.is_empty();
        if adopt {
            let mut names: Vec<String> = std::fs::read_dir(&sst_dir)?
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| n.ends_with(".sst"))
                .collect();
            // filenames lead with the seq, so this is oldest first
            names.sort();
            for name in names {
                manifest.add(name, Level::L0);
            }
        }

        let (l0_sstables, l0_seq) = open_tables(&sst_dir, manifest.filenames(Level::L0))?;
        let (l1_sstables, l1_seq) = open_tables(&sst_dir, manifest.filenames(Level::L1))?;
        let table_seq = l0_seq.max(l1_seq);
        if adopt || table_seq > manifest.last_seq() {
            manifest.set_last_seq(table_seq);
            manifest.save()?;
        }
        let seq = wal_seq.max(manifest.last_seq());

        info!(
            seq,
            dir = %cfg.data_dir.display(),
            memtable_entries = mem.len(),
            l0 = l0_sstables.len(),
            l1 = l1_sstables.len(),
            "engine recovered"
        );

        Ok(Self {
            mem,
            l0_sstables,
            l1_sstables,
            wal_path,
            sst_dir,
            wal_writer,
            manifest,
            seq,
            flush_threshold: cfg.flush_threshold,
            l0_compaction_trigger: cfg.l0_compaction_trigger,
            wal_sync: cfg.wal_sync,
        })
    }
}

/// Replays the WAL into `mem` and returns the highest batch sequence seen.
/// Every op of a batch lands under that batch's sequence. No file means a
/// fresh store.
pub(crate) fn replay_wal(path: &Path, mem: &mut Memtable) -> Result<u64> {
    let mut reader = match WalReader::open(path) {
        Ok(reader) => reader,
        Err(WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(anyhow::Error::new(e).context("opening WAL for replay")),
    };

    let mut max_seq = 0u64;
    let mut batches = 0usize;
    reader.replay(|record| {
        for op in record.ops {
            match op {
                BatchOp::Put { key, value } => mem.put(key, value, record.seq),
                BatchOp::Del { key } => mem.delete(key, record.seq),
            }
        }
        max_seq = max_seq.max(record.seq);
        batches += 1;
    })?;

    debug!(batches, max_seq, "replayed WAL");
    Ok(max_seq)
}

/// Opens `names` in order, skipping files that are gone. Returns the readers
/// and the highest sequence any of them holds.
fn open_tables(sst_dir: &Path, names: Vec<&str>) -> Result<(Vec<SSTableReader>, u64)> {
    let mut readers = Vec::with_capacity(names.len());
    let mut max_seq = 0;
    for name in names {
        let path = sst_dir.join(name);
        if !path.exists() {
            warn!(path = %path.display(), "manifest names a missing table");
            continue;
        }
        let reader = SSTableReader::open(&path)?;
        max_seq = max_seq.max(reader.max_seq());
        readers.push(reader);
    }
    Ok((readers, max_seq))
}

fn remove_tmp_tables(sst_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(sst_dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".sst.tmp"));
        if is_tmp {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove temp table");
            }
        }
    }
}
