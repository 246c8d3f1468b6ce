//! Bitmaps, stored as fixed-size fragments so a single bit write touches at
//! most one subkey. Bits are numbered from the most significant bit of each
//! byte. `size` is the bitmap's length in bytes.

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType};

pub const FRAGMENT_BYTES: u64 = 1024;

/// Highest addressable bit plus one.
const MAX_BITS: u64 = 1 << 32;

fn locate(offset: u64) -> StoreResult<(u32, usize, u8)> {
    if offset >= MAX_BITS {
        return Err(StoreError::InvalidArgument(
            "bit offset is not an integer or out of range".into(),
        ));
    }
    let byte = offset / 8;
    let fragment = (byte / FRAGMENT_BYTES) as u32;
    let within = (byte % FRAGMENT_BYTES) as usize;
    let mask = 0x80u8 >> (offset % 8);
    Ok((fragment, within, mask))
}

impl Database<'_> {
    /// Sets or clears the bit at `offset`. Returns the previous bit.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` for an offset of
    /// 2^32 or more.
    pub fn setbit(&self, key: &[u8], offset: u64, on: bool) -> StoreResult<bool> {
        let _writer = self.exclusive();
        let (fragment, within, mask) = locate(offset)?;
        let mut meta = self.open_or_create(key, DataType::Bitmap, now_ms())?;
        let suffix = fragment.to_be_bytes();

        let mut bytes = if meta.size > 0 {
            self.get_subkey(key, meta.version, &suffix)?.unwrap_or_default()
        } else {
            Vec::new()
        };
        if bytes.len() <= within {
            bytes.resize(within + 1, 0);
        }
        let old = bytes[within] & mask != 0;
        if on {
            bytes[within] |= mask;
        } else {
            bytes[within] &= !mask;
        }

        let mut batch = WriteBatch::new();
        batch.put(self.subkey(key, meta.version, &suffix), bytes);
        meta.size = meta.size.max((offset / 8 + 1) as i64);
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(old)
    }

    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` for an offset of
    /// 2^32 or more.
    pub fn getbit(&self, key: &[u8], offset: u64) -> StoreResult<bool> {
        let (fragment, within, mask) = locate(offset)?;
        let Some(meta) = self.live_typed(key, DataType::Bitmap, now_ms())? else {
            return Ok(false);
        };
        let bytes = self.get_subkey(key, meta.version, &fragment.to_be_bytes())?;
        Ok(bytes
            .and_then(|b| b.get(within).copied())
            .map(|b| b & mask != 0)
            .unwrap_or(false))
    }

    /// Number of set bits.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn bitcount(&self, key: &[u8]) -> StoreResult<u64> {
        let Some(meta) = self.live_typed(key, DataType::Bitmap, now_ms())? else {
            return Ok(0);
        };
        Ok(self
            .scan_subkeys(key, meta.version, b"")?
            .iter()
            .flat_map(|(_, bytes)| bytes.iter())
            .map(|b| u64::from(b.count_ones()))
            .sum())
    }
}
