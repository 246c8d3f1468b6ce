//! Strings. The value lives inline in the metadata record, so a string has
//! no subkeys and every write is a single put.

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType, Metadata};

impl Database<'_> {
    fn string_record(&self, key: &[u8], value: &[u8], now: u64) -> StoreResult<Metadata> {
        // SET replaces whatever the key held, so no type check here
        let current = self.current(key, now)?;
        let mut meta = self.fresh(DataType::String, &current);
        meta.payload = value.to_vec();
        meta.size = value.len() as i64;
        Ok(meta)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .live_typed(key, DataType::String, now_ms())?
            .map(|meta| meta.payload))
    }

    /// Sets `key` to `value`, replacing any value of any type and clearing
    /// its expiry.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let _writer = self.exclusive();
        let meta = self.string_record(key, value, now_ms())?;
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for a zero TTL.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()> {
        let _writer = self.exclusive();
        if ttl_ms == 0 {
            return Err(StoreError::InvalidArgument("invalid expire time".into()));
        }
        let now = now_ms();
        let mut meta = self.string_record(key, value, now)?;
        meta.expire_at = Some(now.saturating_add(ttl_ms));
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(())
    }

    /// Sets `key` only if it does not exist. Returns whether it was set.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        let _writer = self.exclusive();
        let now = now_ms();
        if self.current(key, now)?.live.is_some() {
            return Ok(false);
        }
        let meta = self.string_record(key, value, now)?;
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(true)
    }

    /// Sets `key` and returns its previous string value.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn get_set(&self, key: &[u8], value: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let _writer = self.exclusive();
        let now = now_ms();
        let current = self.current_typed(key, DataType::String, now)?;
        let old = current.live.as_ref().map(|m| m.payload.clone());
        let mut meta = self.fresh(DataType::String, &current);
        meta.payload = value.to_vec();
        meta.size = value.len() as i64;
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(old)
    }

    /// Appends `value` and returns the new length. Keeps any expiry.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn append(&self, key: &[u8], value: &[u8]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::String, now_ms())?;
        meta.payload.extend_from_slice(value);
        meta.size = meta.payload.len() as i64;
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(meta.payload.len() as u64)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn strlen(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self
            .live_typed(key, DataType::String, now_ms())?
            .map(|meta| meta.payload.len() as u64)
            .unwrap_or(0))
    }

    /// Adds `delta` to the integer stored at `key` (absent counts as 0).
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` if the value is not
    /// an integer or the result overflows.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> StoreResult<i64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::String, now_ms())?;
        let value = if meta.payload.is_empty() {
            0
        } else {
            parse_i64(&meta.payload)?
        };
        let next = value.checked_add(delta).ok_or_else(|| {
            StoreError::InvalidArgument("increment or decrement would overflow".into())
        })?;
        meta.payload = next.to_string().into_bytes();
        meta.size = meta.payload.len() as i64;
        let mut batch = WriteBatch::new();
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(next)
    }

    /// Values of `keys`; `None` for absent keys and keys of another type.
    ///
    /// # Errors
    ///
    /// `EngineIo` or `MalformedKey` from the reads.
    pub fn mget(&self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let now = now_ms();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self
                .current(key, now)?
                .live
                .filter(|meta| meta.data_type == DataType::String)
                .map(|meta| meta.payload);
            out.push(value);
        }
        Ok(out)
    }

    /// Sets every pair in one atomic batch.
    ///
    /// # Errors
    ///
    /// `EngineIo` on read or commit failure.
    pub fn mset(&self, pairs: &[(&[u8], &[u8])]) -> StoreResult<()> {
        let _writer = self.exclusive();
        let now = now_ms();
        let mut batch = WriteBatch::new();
        for (key, value) in pairs {
            let meta = self.string_record(key, value, now)?;
            self.put_meta(&mut batch, key, &meta);
        }
        self.commit(batch)?;
        Ok(())
    }
}

pub(crate) fn parse_i64(bytes: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StoreError::InvalidArgument("value is not an integer or out of range".into()))
}
