//! # WAL - write-ahead log and batch codec
//!
//! The unit of durability is an **atomic batch**: every put/delete produced by
//! one logical operation is serialized into a single record, carrying a single
//! sequence number, and appended with one `write_all`. On replay a record is
//! either applied whole or, if its frame was torn by a crash, dropped whole.
//! That is what gives multi-key collection mutations their all-or-nothing
//! behaviour.
//!
//! ## Record layout
//!
//! Each batch is one [`frame`]; its body is `[seq: u64][op_count: u32][op ...]`.
//!
//! Op (Put): `[0: u8][key_len: u32][key][val_len: u32][value]`
//! Op (Del): `[1: u8][key_len: u32][key]`
//!
//! The op codec ([`write_ops`] / [`read_ops`]) and [`frame`] are public; the
//! replication stream ships the same op lists in the same frames.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{BatchOp, WalReader, WalWriter};
//!
//! # fn main() -> Result<(), wal::WalError> {
//! let mut log = WalWriter::create("wal.log", true)?;
//! log.append_batch(1, &[BatchOp::put(b"user:1", b"alice"), BatchOp::del(b"user:0")])?;
//! drop(log);
//!
//! let mut batches = Vec::new();
//! WalReader::open("wal.log")?.replay(|batch| batches.push(batch))?;
//! assert_eq!(batches[0].seq, 1);
//! # Ok(())
//! # }
//! ```

pub mod frame;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

pub use frame::FrameRead;

/// Safety cap on a single record (256 MiB). A resync chunk is applied as one
/// batch, so this is larger than any ordinary write.
pub const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete `key` (tombstone).
    Del { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    pub fn del(key: &[u8]) -> Self {
        BatchOp::Del { key: key.to_vec() }
    }

    /// The physical key this op touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }

    /// Number of bytes this op occupies once encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            BatchOp::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
            BatchOp::Del { key } => 1 + 4 + key.len(),
        }
    }
}

/// One atomic batch as it sits in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Sequence number assigned by the engine to the whole batch.
    pub seq: u64,
    /// Mutations, in application order.
    pub ops: Vec<BatchOp>,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// CRC mismatch, impossible length or unknown op code.
    #[error("corrupt record")]
    Corrupt,

    /// A frame would exceed [`MAX_RECORD_SIZE`].
    #[error("record too large ({0} bytes)")]
    TooLarge(u64),
}

/// Appends the encoded `ops` (count-prefixed) to `w`.
pub fn write_ops<W: Write>(w: &mut W, ops: &[BatchOp]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(ops.len() as u32)?;
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                w.write_u8(OP_PUT)?;
                w.write_u32::<LittleEndian>(key.len() as u32)?;
                w.write_all(key)?;
                w.write_u32::<LittleEndian>(value.len() as u32)?;
                w.write_all(value)?;
            }
            BatchOp::Del { key } => {
                w.write_u8(OP_DEL)?;
                w.write_u32::<LittleEndian>(key.len() as u32)?;
                w.write_all(key)?;
            }
        }
    }
    Ok(())
}

/// Decodes a count-prefixed op list written by [`write_ops`].
///
/// `limit` bounds every length field; anything larger is reported as
/// [`WalError::Corrupt`] instead of allocating.
pub fn read_ops<R: Read>(r: &mut R, limit: usize) -> Result<Vec<BatchOp>, WalError> {
    let count = r.read_u32::<LittleEndian>()? as usize;
    if count > limit {
        return Err(WalError::Corrupt);
    }
    let mut ops = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let op = r.read_u8()?;
        let key = read_len_prefixed(r, limit)?;
        match op {
            OP_PUT => {
                let value = read_len_prefixed(r, limit)?;
                ops.push(BatchOp::Put { key, value });
            }
            OP_DEL => ops.push(BatchOp::Del { key }),
            _ => return Err(WalError::Corrupt),
        }
    }
    Ok(ops)
}

fn read_len_prefixed<R: Read>(r: &mut R, limit: usize) -> Result<Vec<u8>, WalError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > limit {
        return Err(WalError::Corrupt);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Append-only log writer. Each batch becomes one frame and one `write_all`;
/// with `sync` set, the append returns only after `sync_all`.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Scratch frame, reused across appends.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::new(),
        })
    }

    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.append_batch(record.seq, &record.ops)
    }

    /// Logs `ops` as one batch under `seq`.
    ///
    /// # Errors
    ///
    /// [`WalError::TooLarge`] leaves the file untouched; I/O errors may leave
    /// a torn frame, which replay discards.
    pub fn append_batch(&mut self, seq: u64, ops: &[BatchOp]) -> Result<(), WalError> {
        frame::begin(&mut self.buf);
        self.buf.write_u64::<LittleEndian>(seq)?;
        write_ops(&mut self.buf, ops)?;
        frame::seal(&mut self.buf)?;

        self.file.write_all(&self.buf)?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Durability point for writers opened without `sync`.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Reads batches back in append order.
///
/// A frame cut short by a crash ends the replay cleanly: every complete batch
/// before it is returned and the torn one is dropped whole.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Calls `apply` for every complete batch.
    ///
    /// # Errors
    ///
    /// [`WalError::Corrupt`] for a CRC mismatch, an impossible length or an
    /// undecodable body; [`WalError::Io`] for read failures.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        loop {
            // seq + op count
            let body = match frame::read_frame(&mut self.rdr, 12)? {
                FrameRead::Body(body) => body,
                FrameRead::End | FrameRead::Torn => return Ok(()),
            };
            apply(decode_record(&body)?);
        }
    }
}

fn decode_record(body: &[u8]) -> Result<WalRecord, WalError> {
    let mut rest = body;
    let seq = rest.read_u64::<LittleEndian>()?;
    let ops = read_ops(&mut rest, body.len()).map_err(|e| match e {
        // a short read inside a CRC-valid body is corruption, not a torn tail
        WalError::Io(_) => WalError::Corrupt,
        other => other,
    })?;
    if !rest.is_empty() {
        return Err(WalError::Corrupt);
    }
    Ok(WalRecord { seq, ops })
}

#[cfg(test)]
mod tests;
