//! # Key codec
//!
//! Maps `(namespace, logical key, version, suffix)` onto flat engine keys.
//! Everything for one namespace shares a 2-byte prefix, so a namespace is a
//! contiguous key range, and every subkey of one collection version is a
//! contiguous range too.
//!
//! ```text
//! metadata key : [prefix u16 BE]['M'][key]
//! subkey       : [prefix u16 BE]['S'][key_len u32 BE][key][version u64 BE][suffix]
//! system key   : [0x00 0x00][tag][...]
//! ```
//!
//! The key length makes the subkey layout unambiguous: no key is a byte
//! prefix of another key's subkey range, whatever bytes the keys contain.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{StoreError, StoreResult};
use crate::namespace::{Namespace, NamespaceTable};

/// Prefix of the system area. Never assigned to a namespace.
pub const SYSTEM_PREFIX: u16 = 0;

pub const KIND_METADATA: u8 = b'M';
pub const KIND_SUBKEY: u8 = b'S';

/// System tag for persisted namespace definitions.
pub const SYS_NAMESPACE: u8 = b'N';
/// System tag for replication bookkeeping.
pub const SYS_REPLICATION: u8 = b'R';

const PREFIX_LEN: usize = 2;
const HEADER_LEN: usize = PREFIX_LEN + 1;
const VERSION_LEN: usize = 8;

/// A physical key split into its parts, without any namespace check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKey<'a> {
    Metadata {
        prefix: u16,
        key: &'a [u8],
    },
    Subkey {
        prefix: u16,
        key: &'a [u8],
        version: u64,
        suffix: &'a [u8],
    },
    System {
        tag: u8,
        rest: &'a [u8],
    },
}

pub fn encode_metadata_key(prefix: u16, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + key.len());
    buf.extend_from_slice(&prefix.to_be_bytes());
    buf.push(KIND_METADATA);
    buf.extend_from_slice(key);
    buf
}

pub fn encode_subkey(prefix: u16, key: &[u8], version: u64, suffix: &[u8]) -> Vec<u8> {
    let mut buf = subkey_prefix(prefix, key, version);
    buf.extend_from_slice(suffix);
    buf
}

/// Every subkey of `key` at `version` starts with these bytes.
pub fn subkey_prefix(prefix: u16, key: &[u8], version: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 4 + key.len() + VERSION_LEN);
    buf.extend_from_slice(&prefix.to_be_bytes());
    buf.push(KIND_SUBKEY);
    buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_be_bytes());
    buf
}

pub fn system_key(tag: u8, rest: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + rest.len());
    buf.extend_from_slice(&SYSTEM_PREFIX.to_be_bytes());
    buf.push(tag);
    buf.extend_from_slice(rest);
    buf
}

/// Key holding the last replication sequence this store applied as a follower.
pub fn applied_seq_key() -> Vec<u8> {
    system_key(SYS_REPLICATION, b"applied")
}

/// Present while a follower is part way through installing a snapshot.
pub fn resync_marker_key() -> Vec<u8> {
    system_key(SYS_REPLICATION, b"resync")
}

/// Smallest byte string greater than every string starting with `prefix`.
/// Empty (unbounded) when `prefix` is all `0xFF`.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last < 0xFF {
            out.push(last + 1);
            return out;
        }
    }
    out
}

/// `[start, end)` of everything starting with `prefix`.
pub fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (prefix.to_vec(), prefix_successor(prefix))
}

/// `[start, end)` of every metadata key in a namespace.
pub fn namespace_metadata_range(prefix: u16) -> (Vec<u8>, Vec<u8>) {
    prefix_range(&encode_metadata_key(prefix, b""))
}

/// `[start, end)` of every subkey in a namespace, all keys and versions.
pub fn namespace_subkey_range(prefix: u16) -> (Vec<u8>, Vec<u8>) {
    let mut head = prefix.to_be_bytes().to_vec();
    head.push(KIND_SUBKEY);
    prefix_range(&head)
}

/// `[start, end)` of every key in a namespace.
pub fn namespace_range(prefix: u16) -> (Vec<u8>, Vec<u8>) {
    prefix_range(&prefix.to_be_bytes())
}

/// `[start, end)` of every subkey of one logical key, all versions.
pub fn key_subkey_range(prefix: u16, key: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut head = Vec::with_capacity(HEADER_LEN + 4 + key.len());
    head.extend_from_slice(&prefix.to_be_bytes());
    head.push(KIND_SUBKEY);
    head.extend_from_slice(&(key.len() as u32).to_be_bytes());
    head.extend_from_slice(key);
    prefix_range(&head)
}

/// Splits a physical key by layout alone.
///
/// # Errors
///
/// `MalformedKey` on a truncated key or an unknown kind byte.
pub fn decode_raw(bytes: &[u8]) -> StoreResult<RawKey<'_>> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::malformed(format!(
            "key too short ({} bytes)",
            bytes.len()
        )));
    }
    let prefix = BigEndian::read_u16(&bytes[..PREFIX_LEN]);
    let kind = bytes[PREFIX_LEN];
    let body = &bytes[HEADER_LEN..];

    if prefix == SYSTEM_PREFIX {
        return Ok(RawKey::System {
            tag: kind,
            rest: body,
        });
    }

    match kind {
        KIND_METADATA => Ok(RawKey::Metadata { prefix, key: body }),
        KIND_SUBKEY => {
            if body.len() < 4 {
                return Err(StoreError::malformed("subkey truncated before key length"));
            }
            let key_len = BigEndian::read_u32(&body[..4]) as usize;
            let rest = &body[4..];
            if rest.len() < key_len + VERSION_LEN {
                return Err(StoreError::malformed(format!(
                    "subkey truncated: key_len {} but {} bytes follow",
                    key_len,
                    rest.len()
                )));
            }
            let (key, rest) = rest.split_at(key_len);
            let version = BigEndian::read_u64(&rest[..VERSION_LEN]);
            Ok(RawKey::Subkey {
                prefix,
                key,
                version,
                suffix: &rest[VERSION_LEN..],
            })
        }
        other => Err(StoreError::malformed(format!(
            "unknown kind byte 0x{:02x}",
            other
        ))),
    }
}

fn live_namespace(table: &NamespaceTable, prefix: u16) -> StoreResult<Namespace> {
    table
        .by_prefix(prefix)
        .ok_or_else(|| StoreError::malformed(format!("prefix 0x{:04x} is not a live namespace", prefix)))
}

/// Inverse of [`encode_metadata_key`].
///
/// # Errors
///
/// `MalformedKey` when the layout is wrong, the key is a subkey or system key,
/// or the prefix does not belong to a live namespace.
pub fn decode_metadata_key<'a>(
    table: &NamespaceTable,
    bytes: &'a [u8],
) -> StoreResult<(Namespace, &'a [u8])> {
    match decode_raw(bytes)? {
        RawKey::Metadata { prefix, key } => Ok((live_namespace(table, prefix)?, key)),
        _ => Err(StoreError::malformed("not a metadata key")),
    }
}

/// Inverse of [`encode_subkey`]: `(namespace, key, version, suffix)`.
///
/// # Errors
///
/// Same conditions as [`decode_metadata_key`].
pub fn decode_subkey<'a>(
    table: &NamespaceTable,
    bytes: &'a [u8],
) -> StoreResult<(Namespace, &'a [u8], u64, &'a [u8])> {
    match decode_raw(bytes)? {
        RawKey::Subkey {
            prefix,
            key,
            version,
            suffix,
        } => Ok((live_namespace(table, prefix)?, key, version, suffix)),
        _ => Err(StoreError::malformed("not a subkey")),
    }
}

/// Maps an `f64` onto 8 bytes whose byte order is `f64::total_cmp` order.
pub fn encode_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    ordered.to_be_bytes()
}

pub fn decode_score(bytes: &[u8]) -> StoreResult<f64> {
    if bytes.len() < 8 {
        return Err(StoreError::malformed("score truncated"));
    }
    let ordered = BigEndian::read_u64(&bytes[..8]);
    let bits = if ordered >> 63 == 1 {
        ordered & !(1 << 63)
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}
