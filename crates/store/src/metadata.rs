//! Metadata records.
//!
//! One record per logical key, stored under the metadata key:
//!
//! ```text
//! [type u8][version u64 BE][expire_at u64 BE, 0 = none][size i64 BE]
//!   + List:   [head u64 BE][tail u64 BE]
//!   + String: [payload]
//! ```
//!
//! The version tags every subkey of the collection. Replacing a collection
//! writes a record with a fresh version; the old subkeys stop being visible at
//! once and are reclaimed later by the orphan collector.

use byteorder::{BigEndian, ByteOrder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::batch::WriteBatch;
use crate::codec::encode_metadata_key;
use crate::error::{StoreError, StoreResult};
use crate::Storage;

const HEADER_LEN: usize = 1 + 8 + 8 + 8;
const LIST_EXTRA_LEN: usize = 16;

/// Initial list head and tail. Pushes move away from it in both directions.
pub const LIST_ORIGIN: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    None = 0,
    String = 1,
    Hash = 2,
    List = 3,
    Set = 4,
    ZSet = 5,
    Bitmap = 6,
}

impl DataType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DataType::None),
            1 => Some(DataType::String),
            2 => Some(DataType::Hash),
            3 => Some(DataType::List),
            4 => Some(DataType::Set),
            5 => Some(DataType::ZSet),
            6 => Some(DataType::Bitmap),
            _ => None,
        }
    }

    /// Name as reported by `TYPE`.
    pub fn name(self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::String => "string",
            DataType::Hash => "hash",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::ZSet => "zset",
            DataType::Bitmap => "bitmap",
        }
    }

    /// Collections keep their elements in subkeys; a collection with no
    /// elements reads as absent.
    pub fn is_collection(self) -> bool {
        match self {
            DataType::None | DataType::String => false,
            DataType::Hash
            | DataType::List
            | DataType::Set
            | DataType::ZSet
            | DataType::Bitmap => true,
        }
    }
}

/// A decoded metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub data_type: DataType,
    pub version: u64,
    /// Unix milliseconds. `None` never expires.
    pub expire_at: Option<u64>,
    /// Element count for collections, payload length for strings, byte
    /// length for bitmaps.
    pub size: i64,
    /// List only: first occupied slot.
    pub head: u64,
    /// List only: one past the last occupied slot.
    pub tail: u64,
    /// String only.
    pub payload: Vec<u8>,
}

impl Metadata {
    /// The record of an absent key.
    pub fn none() -> Self {
        Self::new(DataType::None, 0)
    }

    pub fn new(data_type: DataType, version: u64) -> Self {
        Self {
            data_type,
            version,
            expire_at: None,
            size: 0,
            head: LIST_ORIGIN,
            tail: LIST_ORIGIN,
            payload: Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.data_type == DataType::None
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expire_at, Some(at) if at <= now)
    }

    /// `true` if reads should see this key at `now`.
    pub fn is_live(&self, now: u64) -> bool {
        if self.is_none() || self.is_expired(now) {
            return false;
        }
        !self.data_type.is_collection() || self.size > 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + LIST_EXTRA_LEN + self.payload.len());
        buf.push(self.data_type as u8);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.expire_at.unwrap_or(0).to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        match self.data_type {
            DataType::List => {
                buf.extend_from_slice(&self.head.to_be_bytes());
                buf.extend_from_slice(&self.tail.to_be_bytes());
            }
            DataType::String => buf.extend_from_slice(&self.payload),
            _ => {}
        }
        buf
    }

    /// # Errors
    ///
    /// `MalformedKey` when the stored value is truncated or has an unknown type tag.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::malformed(format!(
                "metadata value truncated ({} bytes)",
                bytes.len()
            )));
        }
        let data_type = DataType::from_u8(bytes[0])
            .ok_or_else(|| StoreError::malformed(format!("unknown data type tag {}", bytes[0])))?;
        let version = BigEndian::read_u64(&bytes[1..9]);
        let expire_at = match BigEndian::read_u64(&bytes[9..17]) {
            0 => None,
            at => Some(at),
        };
        let size = BigEndian::read_i64(&bytes[17..25]);
        let rest = &bytes[HEADER_LEN..];

        let mut meta = Metadata {
            data_type,
            version,
            expire_at,
            size,
            head: LIST_ORIGIN,
            tail: LIST_ORIGIN,
            payload: Vec::new(),
        };
        match data_type {
            DataType::List => {
                if rest.len() < LIST_EXTRA_LEN {
                    return Err(StoreError::malformed("list metadata missing head/tail"));
                }
                meta.head = BigEndian::read_u64(&rest[..8]);
                meta.tail = BigEndian::read_u64(&rest[8..16]);
            }
            DataType::String => meta.payload = rest.to_vec(),
            _ => {}
        }
        Ok(meta)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Hands out collection versions.
///
/// Every version is strictly greater than the previous one from the same
/// clock and than the version it replaces. Versions start from wall-clock
/// microseconds, so a restarted process keeps going upward.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh version greater than `current`.
    pub fn next_after(&self, current: u64) -> u64 {
        let floor = current.max(now_micros().saturating_sub(1));
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = last.max(floor).saturating_add(1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }

    /// Last version handed out, `0` if none yet.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

/// The record exactly as stored, or `None` if there is no record.
///
/// # Errors
///
/// `EngineIo` on read failure, `MalformedKey` on an undecodable value.
pub fn get_raw(storage: &Storage, prefix: u16, key: &[u8]) -> StoreResult<Option<Metadata>> {
    match storage.get(&encode_metadata_key(prefix, key))? {
        Some(bytes) => Ok(Some(Metadata::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// The record as reads see it at `now`: a None-typed record when the key is
/// absent, expired or an empty collection.
///
/// # Errors
///
/// Same as [`get_raw`].
pub fn get(storage: &Storage, prefix: u16, key: &[u8], now: u64) -> StoreResult<Metadata> {
    Ok(get_raw(storage, prefix, key)?
        .filter(|meta| meta.is_live(now))
        .unwrap_or_else(Metadata::none))
}

/// Enqueues `meta` for `key` into `batch`.
pub fn put(batch: &mut WriteBatch, prefix: u16, key: &[u8], meta: &Metadata) {
    batch.put(encode_metadata_key(prefix, key), meta.encode());
    batch.touch(prefix, key);
}

/// Enqueues deletion of `key`'s metadata record into `batch`.
pub fn delete(batch: &mut WriteBatch, prefix: u16, key: &[u8]) {
    batch.delete(encode_metadata_key(prefix, key));
    batch.touch(prefix, key);
}
