//! # Manifest - table levels and the sequence high-water mark
//!
//! Records which SSTable files are live at which level, plus the last
//! sequence number the engine handed out, so both survive a restart.
//!
//! ## File Format
//!
//! Text, one record per line, newest table first within a level:
//!
//! ```text
//! SEQ:12
//! L0:sst-00000000000000000012-1708600000000.sst
//! L1:sst-00000000000000000010-1708600001000-c.sst
//! ```
//!
//! `#` starts a comment; blank lines are skipped. `SEQ` is kept because
//! compaction may drop the tombstone that carried the highest sequence,
//! after which no table footer remembers it.
//!
//! Saves go through `MANIFEST.tmp` + fsync + rename, so a crash leaves either
//! the old or the new manifest on disk, never a torn one.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Table level. L0 tables may overlap; L1 is the single compacted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L0,
    L1,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::L0 => "L0",
            Level::L1 => "L1",
        })
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L0" => Ok(Level::L0),
            "L1" => Ok(Level::L1),
            other => Err(anyhow!("unknown level {other:?}")),
        }
    }
}

/// A live table and its level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    /// Basename inside the SST directory.
    pub filename: String,
    pub level: Level,
}

enum Record {
    Seq(u64),
    Table(SstMeta),
}

fn parse_record(line: &str) -> Result<Option<Record>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (tag, rest) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("expected TAG:value, got {line:?}"))?;
    if tag == "SEQ" {
        let seq = rest
            .parse()
            .with_context(|| format!("invalid sequence {rest:?}"))?;
        return Ok(Some(Record::Seq(seq)));
    }
    Ok(Some(Record::Table(SstMeta {
        filename: rest.to_string(),
        level: tag.parse()?,
    })))
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<SstMeta>,
    last_seq: u64,
}

impl Manifest {
    /// Reads `sst_dir/MANIFEST`, or starts empty when there is none.
    ///
    /// # Errors
    ///
    /// I/O failure, or any line that does not parse.
    pub fn load_or_create(sst_dir: &Path) -> Result<Self> {
        let mut manifest = Self {
            path: sst_dir.join(MANIFEST_FILENAME),
            entries: Vec::new(),
            last_seq: 0,
        };
        if !manifest.path.exists() {
            return Ok(manifest);
        }

        let file = File::open(&manifest.path)
            .with_context(|| format!("opening manifest {}", manifest.path.display()))?;
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let record = parse_record(&line?)
                .with_context(|| format!("manifest line {}", n + 1))?;
            match record {
                Some(Record::Seq(seq)) => manifest.last_seq = seq,
                Some(Record::Table(meta)) => manifest.entries.push(meta),
                None => {}
            }
        }
        Ok(manifest)
    }

    /// Writes the manifest through a temp file and renames it into place.
    ///
    /// Some platforms refuse to rename over a file that is still open
    /// elsewhere; then the manifest is rewritten in place instead.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        self.write_to(&tmp)?;
        if fs::rename(&tmp, &self.path).is_err() {
            self.write_to(&self.path)?;
            let _ = fs::remove_file(&tmp);
        }
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("writing manifest {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "# Eddy table manifest")?;
        writeln!(out, "SEQ:{}", self.last_seq)?;
        for meta in &self.entries {
            writeln!(out, "{}:{}", meta.level, meta.filename)?;
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filenames at `level`, newest first.
    pub fn filenames(&self, level: Level) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|m| m.level == level)
            .map(|m| m.filename.as_str())
            .collect()
    }

    /// Records a new table as the newest of its level. Not saved until [`save`](Self::save).
    pub fn add(&mut self, filename: String, level: Level) {
        let at = self
            .entries
            .iter()
            .position(|m| m.level == level)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, SstMeta { filename, level });
    }

    /// Swaps every table for the one compaction produced, or for nothing.
    pub fn replace_all(&mut self, merged: Option<String>) {
        self.entries.clear();
        if let Some(filename) = merged {
            self.entries.push(SstMeta {
                filename,
                level: Level::L1,
            });
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Raises the recorded sequence; never lowers it.
    pub fn set_last_seq(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }
}
