//! `Database`: a handle bound to one namespace.
//!
//! Every collection operation follows the same protocol:
//!
//! 1. read the key's metadata (expired and empty collections read as absent),
//! 2. fail with `TypeMismatch` if a live key holds another type,
//! 3. either replace the value under a fresh version, or mutate in place under
//!    the current version with a size delta,
//! 4. put metadata and subkey changes into one [`WriteBatch`] and commit it,
//! 5. return the result.
//!
//! Mutations hold the storage writer lock across all five steps, so the
//! metadata a mutation read is still current when its batch commits.
//!
//! The per-type operations live in `crate::types::*`; generic key operations
//! are here.

use parking_lot::ReentrantMutexGuard;
use std::collections::BTreeSet;

use crate::batch::WriteBatch;
use crate::codec::{
    encode_metadata_key, encode_subkey, namespace_metadata_range, prefix_range, subkey_prefix,
};
use crate::error::{StoreError, StoreResult};
use crate::metadata::{self, now_ms, DataType, Metadata};
use crate::namespace::Namespace;
use crate::Storage;

/// A key's metadata as one operation sees it.
#[derive(Debug, Clone)]
pub(crate) struct Current {
    /// The record if reads can see it.
    pub live: Option<Metadata>,
    /// Version of whatever record is stored, `0` if there is none. A new
    /// version must be greater than this even when the record is dead.
    pub stored_version: u64,
}

#[derive(Debug, Clone)]
pub struct Database<'s> {
    storage: &'s Storage,
    ns: Namespace,
}

impl<'s> Database<'s> {
    pub(crate) fn new(storage: &'s Storage, ns: Namespace) -> Self {
        Self { storage, ns }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn storage(&self) -> &'s Storage {
        self.storage
    }

    pub(crate) fn prefix(&self) -> u16 {
        self.ns.prefix()
    }

    /// Taken first by every mutation and held until it returns.
    pub(crate) fn exclusive(&self) -> ReentrantMutexGuard<'s, ()> {
        self.storage.writer()
    }

    pub(crate) fn current(&self, key: &[u8], now: u64) -> StoreResult<Current> {
        let raw = metadata::get_raw(self.storage, self.prefix(), key)?;
        let stored_version = raw.as_ref().map(|m| m.version).unwrap_or(0);
        Ok(Current {
            live: raw.filter(|m| m.is_live(now)),
            stored_version,
        })
    }

    /// Like [`current`](Self::current), failing with `TypeMismatch` when a
    /// live key holds something other than `expected`.
    pub(crate) fn current_typed(
        &self,
        key: &[u8],
        expected: DataType,
        now: u64,
    ) -> StoreResult<Current> {
        let current = self.current(key, now)?;
        match &current.live {
            Some(meta) if meta.data_type != expected => Err(StoreError::TypeMismatch),
            _ => Ok(current),
        }
    }

    /// The live record of type `expected`, or `None`.
    pub(crate) fn live_typed(
        &self,
        key: &[u8],
        expected: DataType,
        now: u64,
    ) -> StoreResult<Option<Metadata>> {
        Ok(self.current_typed(key, expected, now)?.live)
    }

    /// A new empty record of `data_type` with a version above anything stored.
    pub(crate) fn fresh(&self, data_type: DataType, current: &Current) -> Metadata {
        Metadata::new(data_type, self.storage.clock().next_after(current.stored_version))
    }

    /// The live record if there is one, else a fresh empty one.
    pub(crate) fn open_or_create(
        &self,
        key: &[u8],
        data_type: DataType,
        now: u64,
    ) -> StoreResult<Metadata> {
        let current = self.current_typed(key, data_type, now)?;
        Ok(match current.live {
            Some(meta) => meta,
            None => self.fresh(data_type, &current),
        })
    }

    pub(crate) fn subkey(&self, key: &[u8], version: u64, suffix: &[u8]) -> Vec<u8> {
        encode_subkey(self.prefix(), key, version, suffix)
    }

    pub(crate) fn get_subkey(
        &self,
        key: &[u8],
        version: u64,
        suffix: &[u8],
    ) -> StoreResult<Option<Vec<u8>>> {
        self.storage.get(&self.subkey(key, version, suffix))
    }

    /// Every `(suffix, value)` of `key` at `version` whose suffix starts with
    /// `within`, in suffix order.
    pub(crate) fn scan_subkeys(
        &self,
        key: &[u8],
        version: u64,
        within: &[u8],
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let head = subkey_prefix(self.prefix(), key, version);
        let mut start = head.clone();
        start.extend_from_slice(within);
        let (start, end) = prefix_range(&start);
        self.scan_subkey_range(&head, &start, &end)
    }

    /// `(suffix, value)` pairs for subkeys in `[start, end)`; `head` is the
    /// subkey prefix stripped from each key.
    pub(crate) fn scan_subkey_range(
        &self,
        head: &[u8],
        start: &[u8],
        end: &[u8],
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .storage
            .scan(start, end)?
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(head).map(|suffix| (suffix.to_vec(), v)))
            .collect())
    }

    /// Enqueues `meta` for `key`.
    pub(crate) fn put_meta(&self, batch: &mut WriteBatch, key: &[u8], meta: &Metadata) {
        metadata::put(batch, self.prefix(), key, meta);
    }

    pub(crate) fn commit(&self, batch: WriteBatch) -> StoreResult<u64> {
        self.storage.commit(batch)
    }

    // --- generic key operations ---

    /// Type of `key`; `DataType::None` when it is absent.
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` from the metadata read.
    pub fn type_of(&self, key: &[u8]) -> StoreResult<DataType> {
        Ok(metadata::get(self.storage, self.prefix(), key, now_ms())?.data_type)
    }

    /// Number of `keys` that exist. Repeated keys count each time.
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` from the metadata reads.
    pub fn exists(&self, keys: &[&[u8]]) -> StoreResult<u64> {
        let now = now_ms();
        let mut count = 0;
        for key in keys {
            if self.current(key, now)?.live.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Deletes `keys` by removing their metadata only; subkeys become orphans
    /// for the collector. Returns how many live keys were removed.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn del(&self, keys: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let now = now_ms();
        let mut batch = WriteBatch::new();
        let mut removed = 0;
        let unique: BTreeSet<&[u8]> = keys.iter().copied().collect();
        for key in unique {
            let raw = metadata::get_raw(self.storage, self.prefix(), key)?;
            if let Some(meta) = raw {
                if meta.is_live(now) {
                    removed += 1;
                }
                metadata::delete(&mut batch, self.prefix(), key);
            }
        }
        self.commit(batch)?;
        Ok(removed)
    }

    /// Sets `key` to expire at `at_ms` (unix ms). A time in the past deletes it.
    /// Returns `false` if the key does not exist.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn expire_at(&self, key: &[u8], at_ms: u64) -> StoreResult<bool> {
        let _writer = self.exclusive();
        let now = now_ms();
        let Some(mut meta) = self.current(key, now)?.live else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        if at_ms <= now {
            metadata::delete(&mut batch, self.prefix(), key);
        } else {
            meta.expire_at = Some(at_ms);
            self.put_meta(&mut batch, key, &meta);
        }
        self.commit(batch)?;
        Ok(true)
    }

    /// Sets a time-to-live of `ttl_ms` milliseconds. Zero or negative deletes.
    ///
    /// # Errors
    ///
    /// Same as [`expire_at`](Self::expire_at).
    pub fn expire(&self, key: &[u8], ttl_ms: i64) -> StoreResult<bool> {
        let now = now_ms();
        let at = if ttl_ms <= 0 {
            now
        } else {
            now.saturating_add(ttl_ms as u64)
        };
        self.expire_at(key, at)
    }

    /// Removes any expiry. Returns `true` if one was removed.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn persist(&self, key: &[u8]) -> StoreResult<bool> {
        let _writer = self.exclusive();
        let now = now_ms();
        match self.current(key, now)?.live {
            Some(mut meta) if meta.expire_at.is_some() => {
                meta.expire_at = None;
                let mut batch = WriteBatch::new();
                self.put_meta(&mut batch, key, &meta);
                self.commit(batch)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remaining time to live in milliseconds: `-2` if the key does not
    /// exist, `-1` if it has no expiry.
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` from the metadata read.
    pub fn ttl(&self, key: &[u8]) -> StoreResult<i64> {
        let now = now_ms();
        Ok(match self.current(key, now)?.live {
            None => -2,
            Some(Metadata { expire_at: None, .. }) => -1,
            Some(Metadata {
                expire_at: Some(at),
                ..
            }) => at.saturating_sub(now) as i64,
        })
    }

    /// Live keys starting with `prefix`, in byte order.
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` while scanning.
    pub fn keys(&self, prefix: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let now = now_ms();
        let (start, end) = prefix_range(&encode_metadata_key(self.prefix(), prefix));
        let head_len = encode_metadata_key(self.prefix(), b"").len();
        let mut out = Vec::new();
        for (k, v) in self.storage.scan(&start, &end)? {
            if Metadata::decode(&v)?.is_live(now) {
                out.push(k[head_len..].to_vec());
            }
        }
        Ok(out)
    }

    /// Deletes every key in the namespace. Returns how many were live.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn flushdb(&self) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let now = now_ms();
        let (start, end) = namespace_metadata_range(self.prefix());
        let head_len = encode_metadata_key(self.prefix(), b"").len();
        let mut batch = WriteBatch::new();
        let mut live = 0;
        for (k, v) in self.storage.scan(&start, &end)? {
            if Metadata::decode(&v)?.is_live(now) {
                live += 1;
            }
            metadata::delete(&mut batch, self.prefix(), &k[head_len..]);
        }
        self.commit(batch)?;
        Ok(live)
    }
}
