//! Replication stream protocol.
//!
//! A follower sends one [`Request`], the producer answers with one
//! [`Response`]. Both travel in [`wal::frame`]s, the same CRC-checked
//! frames the log file uses.
//!
//! Body: `[tag: u8][fields ...]`, integers little-endian. Batch ops use the
//! WAL op codec ([`wal::write_ops`]), so an entry on the wire carries the
//! same bytes as the record the producer logged.
//!
//! | Tag    | Message        | Fields                                       |
//! |--------|----------------|----------------------------------------------|
//! | `0x01` | Fetch          | next u64, max_entries u32, max_wait_ms u64   |
//! | `0x02` | SnapshotChunk  | max_pairs u32, start (len u32 + bytes)       |
//! | `0x03` | Status         |                                              |
//! | `0x81` | Entries        | next u64, count u32, (seq, at_ms, ops)*      |
//! | `0x82` | UpToDate       | last_published u64                           |
//! | `0x83` | SequenceTooOld | floor u64                                    |
//! | `0x84` | SequenceAhead  | last_published u64                           |
//! | `0x85` | SnapshotChunk  | seq u64, next (u8 flag, len u32 + bytes),    |
//! |        |                | pairs as put ops                             |
//! | `0x86` | Status         | last, floor, entries, bytes (u64 each)       |
//! | `0x87` | Error          | len u32, UTF-8 message                       |
//!
//! An entry is `[seq u64][committed_at_ms u64][ops]`, on the wire and in the
//! producer's journal alike.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::sync::Arc;
use store::BatchOp;
use wal::frame::{self, FrameRead};
use wal::{read_ops, write_ops};

use crate::error::{ReplResult, ReplicationError};
use crate::log::{FetchResult, LogStatus, ReplicationEntry};

const TAG_FETCH: u8 = 0x01;
const TAG_SNAPSHOT_CHUNK: u8 = 0x02;
const TAG_STATUS: u8 = 0x03;

const TAG_ENTRIES: u8 = 0x81;
const TAG_UP_TO_DATE: u8 = 0x82;
const TAG_TOO_OLD: u8 = 0x83;
const TAG_AHEAD: u8 = 0x84;
const TAG_CHUNK_DATA: u8 = 0x85;
const TAG_STATUS_DATA: u8 = 0x86;
const TAG_ERROR: u8 = 0x87;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Entries starting at `next_sequence`. With `max_wait_ms > 0` the
    /// producer holds an `UpToDate` answer that long waiting for new writes.
    Fetch {
        next_sequence: u64,
        max_entries: u32,
        max_wait_ms: u64,
    },
    /// One page of the dataset starting at key `start`, for resync.
    SnapshotChunk { start: Vec<u8>, max_pairs: u32 },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Entries {
        entries: Vec<Arc<ReplicationEntry>>,
        next_sequence: u64,
    },
    UpToDate {
        last_published: u64,
    },
    SequenceTooOld {
        floor: u64,
    },
    SequenceAhead {
        last_published: u64,
    },
    /// Every snapshot key from the requested start up to `next`, read at
    /// `seq`. `next: None` ends the snapshot.
    SnapshotChunk {
        seq: u64,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
        next: Option<Vec<u8>>,
    },
    Status(LogStatus),
    Error {
        message: String,
    },
}

impl From<FetchResult> for Response {
    fn from(result: FetchResult) -> Self {
        match result {
            FetchResult::Entries {
                entries,
                next_sequence,
            } => Response::Entries {
                entries,
                next_sequence,
            },
            FetchResult::UpToDate { last_published } => Response::UpToDate { last_published },
            FetchResult::SequenceTooOld { floor } => Response::SequenceTooOld { floor },
            FetchResult::SequenceAhead { last_published } => {
                Response::SequenceAhead { last_published }
            }
        }
    }
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21);
        match self {
            Request::Fetch {
                next_sequence,
                max_entries,
                max_wait_ms,
            } => {
                buf.push(TAG_FETCH);
                buf.extend_from_slice(&next_sequence.to_le_bytes());
                buf.extend_from_slice(&max_entries.to_le_bytes());
                buf.extend_from_slice(&max_wait_ms.to_le_bytes());
            }
            Request::SnapshotChunk { start, max_pairs } => {
                buf.push(TAG_SNAPSHOT_CHUNK);
                buf.extend_from_slice(&max_pairs.to_le_bytes());
                put_bytes(&mut buf, start);
            }
            Request::Status => buf.push(TAG_STATUS),
        }
        buf
    }

    /// # Errors
    ///
    /// `Protocol` on an unknown tag, `Corrupt` on a short body.
    pub fn decode(body: &[u8]) -> ReplResult<Self> {
        let mut r = body;
        let request = match r.read_u8().map_err(short)? {
            TAG_FETCH => Request::Fetch {
                next_sequence: r.read_u64::<LittleEndian>().map_err(short)?,
                max_entries: r.read_u32::<LittleEndian>().map_err(short)?,
                max_wait_ms: r.read_u64::<LittleEndian>().map_err(short)?,
            },
            TAG_SNAPSHOT_CHUNK => Request::SnapshotChunk {
                max_pairs: r.read_u32::<LittleEndian>().map_err(short)?,
                start: take_bytes(&mut r)?,
            },
            TAG_STATUS => Request::Status,
            tag => return Err(ReplicationError::protocol(format!("unknown request tag {tag:#04x}"))),
        };
        expect_end(r)?;
        Ok(request)
    }
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// # Errors
    ///
    /// `Io` only if the in-memory writer fails, which it does not.
    pub fn encode(&self) -> ReplResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        match self {
            Response::Entries {
                entries,
                next_sequence,
            } => {
                buf.push(TAG_ENTRIES);
                buf.write_u64::<LittleEndian>(*next_sequence)?;
                buf.write_u32::<LittleEndian>(entries.len() as u32)?;
                for entry in entries {
                    write_entry(&mut buf, entry)?;
                }
            }
            Response::UpToDate { last_published } => {
                buf.push(TAG_UP_TO_DATE);
                buf.write_u64::<LittleEndian>(*last_published)?;
            }
            Response::SequenceTooOld { floor } => {
                buf.push(TAG_TOO_OLD);
                buf.write_u64::<LittleEndian>(*floor)?;
            }
            Response::SequenceAhead { last_published } => {
                buf.push(TAG_AHEAD);
                buf.write_u64::<LittleEndian>(*last_published)?;
            }
            Response::SnapshotChunk { seq, pairs, next } => {
                buf.push(TAG_CHUNK_DATA);
                buf.write_u64::<LittleEndian>(*seq)?;
                match next {
                    Some(next) => {
                        buf.push(1);
                        put_bytes(&mut buf, next);
                    }
                    None => buf.push(0),
                }
                let ops: Vec<BatchOp> = pairs
                    .iter()
                    .map(|(key, value)| BatchOp::put(key, value))
                    .collect();
                write_ops(&mut buf, &ops)?;
            }
            Response::Status(status) => {
                buf.push(TAG_STATUS_DATA);
                buf.write_u64::<LittleEndian>(status.last_published)?;
                buf.write_u64::<LittleEndian>(status.retention_floor)?;
                buf.write_u64::<LittleEndian>(status.retained_entries as u64)?;
                buf.write_u64::<LittleEndian>(status.retained_bytes as u64)?;
            }
            Response::Error { message } => {
                buf.push(TAG_ERROR);
                buf.write_u32::<LittleEndian>(message.len() as u32)?;
                buf.extend_from_slice(message.as_bytes());
            }
        }
        Ok(buf)
    }

    /// # Errors
    ///
    /// `Protocol` on an unknown tag, `Corrupt` on a short or inconsistent body.
    pub fn decode(body: &[u8]) -> ReplResult<Self> {
        let limit = body.len();
        let mut r = body;
        let response = match r.read_u8().map_err(short)? {
            TAG_ENTRIES => {
                let next_sequence = r.read_u64::<LittleEndian>().map_err(short)?;
                let count = r.read_u32::<LittleEndian>().map_err(short)? as usize;
                if count > limit {
                    return Err(ReplicationError::corrupt("entry count exceeds frame"));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(Arc::new(read_entry(&mut r, limit)?));
                }
                Response::Entries {
                    entries,
                    next_sequence,
                }
            }
            TAG_UP_TO_DATE => Response::UpToDate {
                last_published: r.read_u64::<LittleEndian>().map_err(short)?,
            },
            TAG_TOO_OLD => Response::SequenceTooOld {
                floor: r.read_u64::<LittleEndian>().map_err(short)?,
            },
            TAG_AHEAD => Response::SequenceAhead {
                last_published: r.read_u64::<LittleEndian>().map_err(short)?,
            },
            TAG_CHUNK_DATA => {
                let seq = r.read_u64::<LittleEndian>().map_err(short)?;
                let next = match r.read_u8().map_err(short)? {
                    0 => None,
                    1 => Some(take_bytes(&mut r)?),
                    flag => return Err(ReplicationError::corrupt(format!("bad cursor flag {flag}"))),
                };
                let pairs = read_ops(&mut r, limit)?
                    .into_iter()
                    .map(|op| match op {
                        BatchOp::Put { key, value } => Ok((key, value)),
                        BatchOp::Del { .. } => {
                            Err(ReplicationError::corrupt("delete inside snapshot"))
                        }
                    })
                    .collect::<ReplResult<Vec<_>>>()?;
                Response::SnapshotChunk { seq, pairs, next }
            }
            TAG_STATUS_DATA => Response::Status(LogStatus {
                last_published: r.read_u64::<LittleEndian>().map_err(short)?,
                retention_floor: r.read_u64::<LittleEndian>().map_err(short)?,
                retained_entries: r.read_u64::<LittleEndian>().map_err(short)? as usize,
                retained_bytes: r.read_u64::<LittleEndian>().map_err(short)? as usize,
            }),
            TAG_ERROR => Response::Error {
                message: String::from_utf8_lossy(&take_bytes(&mut r)?).into_owned(),
            },
            tag => {
                return Err(ReplicationError::protocol(format!(
                    "unknown response tag {tag:#04x}"
                )))
            }
        };
        expect_end(r)?;
        Ok(response)
    }
}

fn short(_: io::Error) -> ReplicationError {
    ReplicationError::corrupt("message body too short")
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn take_bytes(r: &mut &[u8]) -> ReplResult<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>().map_err(short)? as usize;
    if len > r.len() {
        return Err(ReplicationError::corrupt("byte string exceeds frame"));
    }
    let (bytes, rest) = r.split_at(len);
    *r = rest;
    Ok(bytes.to_vec())
}

/// Appends `entry` in its wire form.
pub(crate) fn write_entry(buf: &mut Vec<u8>, entry: &ReplicationEntry) -> ReplResult<()> {
    buf.write_u64::<LittleEndian>(entry.seq)?;
    buf.write_u64::<LittleEndian>(entry.committed_at_ms)?;
    write_ops(buf, &entry.ops)?;
    Ok(())
}

/// Reads one entry; `limit` caps the op count.
pub(crate) fn read_entry(r: &mut &[u8], limit: usize) -> ReplResult<ReplicationEntry> {
    let seq = r.read_u64::<LittleEndian>().map_err(short)?;
    let committed_at_ms = r.read_u64::<LittleEndian>().map_err(short)?;
    let ops = read_ops(r, limit)?;
    Ok(ReplicationEntry::new(seq, ops, committed_at_ms))
}

fn expect_end(rest: &[u8]) -> ReplResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ReplicationError::corrupt(format!(
            "{} trailing bytes after message",
            rest.len()
        )))
    }
}

/// Writes `body` as one frame and flushes.
///
/// # Errors
///
/// `Io` from the writer, `Protocol` if the body exceeds the frame limit.
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> ReplResult<()> {
    frame::write_frame(w, body)?;
    w.flush()?;
    Ok(())
}

/// Reads one frame body. `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// `Io` on a read failure or a frame cut short, `Corrupt` on a CRC mismatch
/// or an impossible length.
pub fn read_frame<R: Read>(r: &mut R) -> ReplResult<Option<Vec<u8>>> {
    // every message has at least its tag
    match frame::read_frame(r, 1)? {
        FrameRead::Body(body) => Ok(Some(body)),
        FrameRead::End => Ok(None),
        FrameRead::Torn => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside a frame",
        )
        .into()),
    }
}
