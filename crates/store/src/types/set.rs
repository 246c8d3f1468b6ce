//! Sets: one empty-valued subkey per member.

use std::collections::BTreeSet;

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType};

impl Database<'_> {
    /// Adds members. Returns how many were not already present.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::Set, now_ms())?;
        let has_members = meta.size > 0;

        let unique: BTreeSet<&[u8]> = members.iter().copied().collect();
        let mut batch = WriteBatch::new();
        let mut added = 0i64;
        for member in unique {
            if has_members && self.get_subkey(key, meta.version, member)?.is_some() {
                continue;
            }
            batch.put(self.subkey(key, meta.version, member), Vec::new());
            added += 1;
        }
        if added == 0 {
            return Ok(0);
        }
        meta.size += added;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(added as u64)
    }

    /// Removes members. Returns how many were present.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidState` on size underflow.
    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let Some(mut meta) = self.live_typed(key, DataType::Set, now_ms())? else {
            return Ok(0);
        };
        let unique: BTreeSet<&[u8]> = members.iter().copied().collect();
        let mut batch = WriteBatch::new();
        let mut removed = 0i64;
        for member in unique {
            if self.get_subkey(key, meta.version, member)?.is_some() {
                batch.delete(self.subkey(key, meta.version, member));
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed;
        if meta.size < 0 {
            return Err(StoreError::InvalidState(format!(
                "set size underflow ({})",
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
    pub fn scard(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self
            .live_typed(key, DataType::Set, now_ms())?
            .map(|meta| meta.size as u64)
            .unwrap_or(0))
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        match self.live_typed(key, DataType::Set, now_ms())? {
            Some(meta) => Ok(self.get_subkey(key, meta.version, member)?.is_some()),
            None => Ok(false),
        }
    }

    /// Members in byte order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn smembers(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        match self.live_typed(key, DataType::Set, now_ms())? {
            Some(meta) => Ok(self
                .scan_subkeys(key, meta.version, b"")?
                .into_iter()
                .map(|(member, _)| member)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the whole set under a fresh version. Returns the new size.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn sreplace(&self, key: &[u8], members: &[&[u8]]) -> StoreResult<u64> {
        let members = members.iter().map(|m| (m.to_vec(), Vec::new())).collect();
        self.replace_members(key, DataType::Set, members)
    }
}
