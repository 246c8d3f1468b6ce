//! CRC-checked length-prefixed frames.
//!
//! ```text
//! [body_len + 4: u32 LE][crc32(body): u32 LE][body ...]
//! ```
//!
//! Shared by the log file and the replication stream.

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read, Write};

use crate::{WalError, MAX_RECORD_SIZE};

/// Bytes in front of every body.
pub const FRAME_HEADER_LEN: usize = 8;

/// Outcome of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    Body(Vec<u8>),
    /// The stream ended on a frame boundary (or inside a header).
    End,
    /// The stream ended inside a body.
    Torn,
}

/// A buffer with room reserved for the header; write the body after it,
/// then [`seal`] it.
pub fn begin(buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
}

/// Fills in the header of a buffer started with [`begin`].
///
/// # Errors
///
/// [`WalError::TooLarge`] when the body would not fit one frame.
pub fn seal(buf: &mut [u8]) -> Result<(), WalError> {
    let body = &buf[FRAME_HEADER_LEN..];
    let framed_len = body.len() as u64 + 4;
    if framed_len > u64::from(MAX_RECORD_SIZE) {
        return Err(WalError::TooLarge(framed_len));
    }
    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc = hasher.finalize();

    buf[0..4].copy_from_slice(&(framed_len as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Frames `body` and writes it with one `write_all`.
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> Result<(), WalError> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    begin(&mut buf);
    buf.extend_from_slice(body);
    seal(&mut buf)?;
    w.write_all(&buf)?;
    Ok(())
}

/// Reads the next frame. `min_body` is the smallest body the caller can
/// parse; anything shorter, or longer than [`MAX_RECORD_SIZE`], is corrupt.
///
/// # Errors
///
/// [`WalError::Corrupt`] on a bad length or CRC mismatch, [`WalError::Io`]
/// on any read failure other than running out of input.
pub fn read_frame<R: Read>(r: &mut R, min_body: u32) -> Result<FrameRead, WalError> {
    let framed_len = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::End),
        Err(e) => return Err(e.into()),
    };
    if framed_len < min_body.saturating_add(4) || framed_len > MAX_RECORD_SIZE {
        return Err(WalError::Corrupt);
    }
    let crc = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::End),
        Err(e) => return Err(e.into()),
    };

    let mut body = vec![0u8; (framed_len - 4) as usize];
    match r.read_exact(&mut body) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::Torn),
        Err(e) => return Err(e.into()),
    }

    let mut hasher = Crc32::new();
    hasher.update(&body);
    if hasher.finalize() != crc {
        return Err(WalError::Corrupt);
    }
    Ok(FrameRead::Body(body))
}
