//! Byte layout of the three SSTable sections.
//!
//! ```text
//! record: [crc32: u32][key_len: u32][key][seq: u64][present: u8]([val_len: u32][val])?
//! index:  [key_len: u32][key][data_offset: u64]
//! footer: [max_seq: u64][entry_count: u64][bloom_offset: u64][index_offset: u64][magic: u32]
//! ```
//!
//! The record CRC covers everything after itself. The footer is always the
//! last [`FOOTER_BYTES`] of the file.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};

/// Largest key a reader will allocate for. Guards against corrupt lengths.
pub(crate) const MAX_KEY_BYTES: usize = 64 * 1024;
/// Largest value a reader will allocate for.
pub(crate) const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Appends one data record (CRC first) to `buf`.
pub(crate) fn encode_record(buf: &mut Vec<u8>, key: &[u8], entry: &ValueEntry) -> IoResult<()> {
    let start = buf.len();
    buf.write_u32::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(key.len() as u32)?;
    buf.extend_from_slice(key);
    buf.write_u64::<LittleEndian>(entry.seq)?;
    match &entry.value {
        Some(v) => {
            buf.write_u8(1)?;
            buf.write_u32::<LittleEndian>(v.len() as u32)?;
            buf.extend_from_slice(v);
        }
        None => buf.write_u8(0)?,
    }
    let mut hasher = Crc32::new();
    hasher.update(&buf[start + 4..]);
    buf[start..start + 4].copy_from_slice(&hasher.finalize().to_le_bytes());
    Ok(())
}

/// Reads one data record and checks its CRC.
pub(crate) fn decode_record<R: Read>(r: &mut R) -> IoResult<(Vec<u8>, ValueEntry)> {
    let stored_crc = r.read_u32::<LittleEndian>()?;
    let mut hasher = Crc32::new();

    let key = read_sized(r, MAX_KEY_BYTES, &mut hasher)?;
    let seq = r.read_u64::<LittleEndian>()?;
    let present = r.read_u8()?;
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[present]);
    let value = match present {
        0 => None,
        1 => Some(read_sized(r, MAX_VALUE_BYTES, &mut hasher)?),
        other => return Err(invalid(&format!("bad presence byte {other}"))),
    };

    let actual = hasher.finalize();
    if actual != stored_crc {
        return Err(invalid(&format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {actual:#010x}"
        )));
    }
    Ok((key, ValueEntry { seq, value }))
}

fn read_sized<R: Read>(r: &mut R, max: usize, hasher: &mut Crc32) -> IoResult<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()?;
    if len as usize > max {
        return Err(invalid(&format!("length {len} exceeds maximum {max}")));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    hasher.update(&len.to_le_bytes());
    hasher.update(&bytes);
    Ok(bytes)
}

pub(crate) fn write_index_entry<W: Write>(w: &mut W, key: &[u8], offset: u64) -> IoResult<()> {
    w.write_u32::<LittleEndian>(key.len() as u32)?;
    w.write_all(key)?;
    w.write_u64::<LittleEndian>(offset)
}

/// Reads one index entry; returns it and its encoded size.
pub(crate) fn read_index_entry<R: Read>(r: &mut R) -> IoResult<(Vec<u8>, u64, u64)> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_KEY_BYTES {
        return Err(invalid(&format!("index key length {len} exceeds maximum")));
    }
    let mut key = vec![0u8; len];
    r.read_exact(&mut key)?;
    let offset = r.read_u64::<LittleEndian>()?;
    Ok((key, offset, 4 + len as u64 + 8))
}

/// Magic number identifying Eddy SSTable files (ASCII "EDY1").
pub const SSTABLE_MAGIC: u32 = 0x4544_5931;

/// Footer size: 4 x u64 + magic.
pub const FOOTER_BYTES: u64 = 8 + 8 + 8 + 8 + 4;

/// Parsed SSTable footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Highest sequence number of any record in the table.
    pub max_seq: u64,
    /// Number of records (tombstones included).
    pub entry_count: u64,
    pub bloom_offset: u64,
    pub index_offset: u64,
}

impl Footer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u64::<LittleEndian>(self.max_seq)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.bloom_offset)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
        Ok(())
    }

    /// Reads and validates the footer at the end of `r`.
    ///
    /// Checks the magic and that the section offsets are ordered and inside
    /// the file.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> IoResult<Footer> {
        let filesize = r.seek(SeekFrom::End(0))?;
        if filesize < FOOTER_BYTES {
            return Err(invalid("file too small for SSTable footer"));
        }

        r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
        let footer = Footer {
            max_seq: r.read_u64::<LittleEndian>()?,
            entry_count: r.read_u64::<LittleEndian>()?,
            bloom_offset: r.read_u64::<LittleEndian>()?,
            index_offset: r.read_u64::<LittleEndian>()?,
        };
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SSTABLE_MAGIC {
            return Err(invalid(&format!("unknown SSTable magic: {:#x}", magic)));
        }

        let footer_start = filesize - FOOTER_BYTES;
        if footer.bloom_offset > footer.index_offset || footer.index_offset > footer_start {
            return Err(invalid("SSTable section offsets out of order"));
        }

        Ok(footer)
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
