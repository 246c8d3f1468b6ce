//! Hashes: one subkey per field.

use std::collections::{BTreeMap, BTreeSet};

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType};
use crate::types::string::parse_i64;

impl Database<'_> {
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        match self.live_typed(key, DataType::Hash, now_ms())? {
            Some(meta) => self.get_subkey(key, meta.version, field),
            None => Ok(None),
        }
    }

    /// Sets one or more fields in one batch. Returns how many fields are new.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hset(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::Hash, now_ms())?;
        let has_fields = meta.size > 0;

        let unique: BTreeMap<&[u8], &[u8]> = pairs.iter().copied().collect();
        let mut batch = WriteBatch::new();
        let mut added = 0i64;
        for (field, value) in unique {
            if !has_fields || self.get_subkey(key, meta.version, field)?.is_none() {
                added += 1;
            }
            batch.put(self.subkey(key, meta.version, field), value);
        }
        meta.size += added;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(added as u64)
    }

    /// Removes fields. Returns how many existed. Removing the last field
    /// leaves an empty hash, which reads as absent.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidState` if the stored size
    /// would go negative.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let Some(mut meta) = self.live_typed(key, DataType::Hash, now_ms())? else {
            return Ok(0);
        };
        let unique: BTreeSet<&[u8]> = fields.iter().copied().collect();
        let mut batch = WriteBatch::new();
        let mut removed = 0i64;
        for field in unique {
            if self.get_subkey(key, meta.version, field)?.is_some() {
                batch.delete(self.subkey(key, meta.version, field));
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed;
        if meta.size < 0 {
            return Err(StoreError::InvalidState(format!(
                "hash size underflow ({})",
                meta.size
            )));
        }
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(removed as u64)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        Ok(self.hget(key, field)?.is_some())
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hlen(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self
            .live_typed(key, DataType::Hash, now_ms())?
            .map(|meta| meta.size as u64)
            .unwrap_or(0))
    }

    /// All `(field, value)` pairs in field order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match self.live_typed(key, DataType::Hash, now_ms())? {
            Some(meta) => self.scan_subkeys(key, meta.version, b""),
            None => Ok(Vec::new()),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hkeys(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(f, _)| f).collect())
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hvals(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, v)| v).collect())
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hmget(&self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let Some(meta) = self.live_typed(key, DataType::Hash, now_ms())? else {
            return Ok(vec![None; fields.len()]);
        };
        fields
            .iter()
            .map(|field| self.get_subkey(key, meta.version, field))
            .collect()
    }

    /// Adds `delta` to the integer in `field` (absent counts as 0).
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` if the field is
    /// not an integer or the result overflows.
    pub fn hincr_by(&self, key: &[u8], field: &[u8], delta: i64) -> StoreResult<i64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::Hash, now_ms())?;
        let old = if meta.size > 0 {
            self.get_subkey(key, meta.version, field)?
        } else {
            None
        };
        let value = match &old {
            Some(bytes) => parse_i64(bytes)?,
            None => 0,
        };
        let next = value.checked_add(delta).ok_or_else(|| {
            StoreError::InvalidArgument("increment or decrement would overflow".into())
        })?;

        let mut batch = WriteBatch::new();
        batch.put(
            self.subkey(key, meta.version, field),
            next.to_string().into_bytes(),
        );
        if old.is_none() {
            meta.size += 1;
        }
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(next)
    }

    /// Replaces the whole hash with `pairs` under a fresh version. The old
    /// fields stop being visible at once. Returns the new field count.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn hreplace(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> StoreResult<u64> {
        let members = pairs
            .iter()
            .map(|(f, v)| (f.to_vec(), v.to_vec()))
            .collect();
        self.replace_members(key, DataType::Hash, members)
    }
}
