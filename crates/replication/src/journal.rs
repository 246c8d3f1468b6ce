//! The producer's on-disk copy of the replication log.
//!
//! Every published entry is appended to a segment file as one
//! [`wal::frame`], so the retained window survives a producer restart and
//! followers resume with a fetch instead of a full resync.
//!
//! ```text
//! repl/
//!   seg-00000000000000000001.log   entries 1 ..= 5000
//!   seg-00000000000000005001.log   entries 5001 ..      <- active
//! ```
//!
//! A segment is named after the first sequence it holds. Retention removes
//! whole segments once every entry in them has fallen below the floor, so
//! the journal may keep a little more than the in-memory log.
//!
//! On open, the first torn, corrupt or out-of-order frame ends the journal:
//! its segment is cut back to the last good frame and every later segment
//! is removed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wal::frame::{self, FrameRead};

use crate::error::{ReplResult, ReplicationError};
use crate::log::ReplicationEntry;
use crate::protocol::{read_entry, write_entry};

/// A new segment is started once the active one reaches this size.
pub const DEFAULT_SEGMENT_BYTES: u64 = 8 * 1024 * 1024;

/// `[seq][committed_at_ms][op_count]`
const MIN_ENTRY_BODY: u32 = 8 + 8 + 4;

const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_SUFFIX: &str = ".log";

#[derive(Debug)]
struct Segment {
    path: PathBuf,
    first_seq: u64,
    /// `first_seq - 1` while the segment is empty.
    last_seq: u64,
}

#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    sync: bool,
    segment_bytes: u64,
    /// Oldest first. The last one is the segment appends go to.
    segments: Vec<Segment>,
    active: Option<File>,
    active_len: u64,
    /// Scratch frame, reused across appends.
    buf: Vec<u8>,
}

fn segment_name(first_seq: u64) -> String {
    format!("{SEGMENT_PREFIX}{first_seq:020}{SEGMENT_SUFFIX}")
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

impl Journal {
    /// Opens the journal in `dir`, creating the directory if needed, and
    /// returns it with every entry it holds, in sequence order.
    ///
    /// # Errors
    ///
    /// `Io` if the directory cannot be listed or a segment cannot be read,
    /// cut back or removed. Damaged frames are not errors.
    pub fn open<P: AsRef<Path>>(dir: P, sync: bool) -> ReplResult<(Self, Vec<ReplicationEntry>)> {
        Self::with_segment_bytes(dir, sync, DEFAULT_SEGMENT_BYTES)
    }

    pub fn with_segment_bytes<P: AsRef<Path>>(
        dir: P,
        sync: bool,
        segment_bytes: u64,
    ) -> ReplResult<(Self, Vec<ReplicationEntry>)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut found = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            if let Some(first_seq) = name.to_str().and_then(parse_segment_name) {
                found.push((first_seq, dirent.path()));
            }
        }
        found.sort_unstable_by_key(|(first_seq, _)| *first_seq);

        let mut entries: Vec<ReplicationEntry> = Vec::new();
        let mut segments = Vec::new();
        let mut damaged = false;
        for (first_seq, path) in found {
            if damaged {
                warn!(path = %path.display(), "removing journal segment after damage");
                fs::remove_file(&path)?;
                continue;
            }
            let (loaded, good_len, clean) = load_segment(&path, entries.last().map(|e| e.seq))?;
            if !clean {
                warn!(
                    path = %path.display(),
                    kept = loaded.len(),
                    "replication journal damaged; cutting it back"
                );
                OpenOptions::new().write(true).open(&path)?.set_len(good_len)?;
                damaged = true;
            }
            let first_seq = loaded.first().map_or(first_seq, |e| e.seq);
            let last_seq = loaded.last().map_or(first_seq.saturating_sub(1), |e| e.seq);
            entries.extend(loaded);
            segments.push(Segment {
                path,
                first_seq,
                last_seq,
            });
        }

        let (active, active_len) = match segments.last() {
            Some(segment) => {
                let file = OpenOptions::new().append(true).open(&segment.path)?;
                let len = file.metadata()?.len();
                (Some(file), len)
            }
            None => (None, 0),
        };

        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            info!(
                first = first.seq,
                last = last.seq,
                segments = segments.len(),
                "replication journal loaded"
            );
        }
        Ok((
            Self {
                dir,
                sync,
                segment_bytes,
                segments,
                active,
                active_len,
                buf: Vec::new(),
            },
            entries,
        ))
    }

    /// Appends `entry`, starting a new segment first if the active one is
    /// full.
    ///
    /// # Errors
    ///
    /// `Io` from the file system, `Protocol` if the entry exceeds the frame
    /// limit. A failed write may leave a torn frame, which the next open
    /// cuts off.
    pub fn append(&mut self, entry: &ReplicationEntry) -> ReplResult<()> {
        frame::begin(&mut self.buf);
        write_entry(&mut self.buf, entry)?;
        frame::seal(&mut self.buf)?;

        if self.active.is_none() || self.active_len >= self.segment_bytes {
            self.roll(entry.seq)?;
        }
        let Some(file) = self.active.as_mut() else {
            return Err(ReplicationError::protocol("no active journal segment"));
        };
        file.write_all(&self.buf)?;
        if self.sync {
            file.sync_all()?;
        }
        self.active_len += self.buf.len() as u64;
        if let Some(segment) = self.segments.last_mut() {
            segment.last_seq = entry.seq;
        }
        Ok(())
    }

    fn roll(&mut self, first_seq: u64) -> ReplResult<()> {
        if let Some(file) = self.active.take() {
            file.sync_all()?;
        }
        let path = self.dir.join(segment_name(first_seq));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.active_len = file.metadata()?.len();
        self.active = Some(file);
        debug!(first_seq, "started replication journal segment");
        self.segments.push(Segment {
            path,
            first_seq,
            last_seq: first_seq.saturating_sub(1),
        });
        Ok(())
    }

    /// Removes closed segments holding only entries below `floor`.
    ///
    /// # Errors
    ///
    /// `Io` if a segment cannot be removed; the segments before it are
    /// already gone.
    pub fn truncate_front(&mut self, floor: u64) -> ReplResult<()> {
        let closed = self.segments.len().saturating_sub(1);
        let expired = self.segments[..closed]
            .iter()
            .take_while(|s| s.last_seq < floor)
            .count();
        for segment in self.segments.drain(..expired) {
            fs::remove_file(&segment.path)?;
            debug!(
                first = segment.first_seq,
                last = segment.last_seq,
                "removed replication journal segment"
            );
        }
        Ok(())
    }

    /// Removes every segment. The next append starts a fresh one.
    ///
    /// # Errors
    ///
    /// `Io` if a segment cannot be removed.
    pub fn reset(&mut self) -> ReplResult<()> {
        self.active = None;
        self.active_len = 0;
        for segment in self.segments.drain(..) {
            fs::remove_file(&segment.path)?;
        }
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reads the entries of one segment. Returns them with the length of the
/// good prefix and whether the whole file was good. An entry must directly
/// follow `prev` when there is one.
fn load_segment(path: &Path, mut prev: Option<u64>) -> ReplResult<(Vec<ReplicationEntry>, u64, bool)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut rdr = BufReader::new(file);
    let mut entries = Vec::new();
    let mut good_len = 0u64;
    loop {
        let body = match frame::read_frame(&mut rdr, MIN_ENTRY_BODY) {
            Ok(FrameRead::Body(body)) => body,
            Ok(FrameRead::End | FrameRead::Torn) | Err(wal::WalError::Corrupt) => break,
            Err(e) => return Err(e.into()),
        };
        let mut rest = body.as_slice();
        let entry = match read_entry(&mut rest, body.len()) {
            Ok(entry) if rest.is_empty() => entry,
            _ => break,
        };
        if prev.is_some_and(|p| entry.seq != p + 1) {
            break;
        }
        prev = Some(entry.seq);
        good_len += (frame::FRAME_HEADER_LEN + body.len()) as u64;
        entries.push(entry);
    }
    Ok((entries, good_len, good_len == file_len))
}
