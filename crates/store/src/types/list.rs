//! Lists: elements occupy the slots `[head, tail)` of the current version.
//! Slots are `u64 BE` suffixes, so slot order is key order and a range read
//! is one scan.

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType, Metadata, LIST_ORIGIN};
use crate::types::{normalize_index, normalize_range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Left,
    Right,
}

impl Database<'_> {
    fn push(&self, key: &[u8], values: &[&[u8]], end: End) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut meta = self.open_or_create(key, DataType::List, now_ms())?;
        if values.is_empty() {
            return Ok(meta.size as u64);
        }

        let mut batch = WriteBatch::new();
        for value in values {
            let slot = match end {
                End::Left => {
                    meta.head = meta
                        .head
                        .checked_sub(1)
                        .ok_or_else(|| StoreError::InvalidState("list head exhausted".into()))?;
                    meta.head
                }
                End::Right => {
                    let slot = meta.tail;
                    meta.tail = meta
                        .tail
                        .checked_add(1)
                        .ok_or_else(|| StoreError::InvalidState("list tail exhausted".into()))?;
                    slot
                }
            };
            batch.put(self.subkey(key, meta.version, &slot.to_be_bytes()), *value);
        }
        meta.size += values.len() as i64;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(meta.size as u64)
    }

    fn pop(&self, key: &[u8], end: End) -> StoreResult<Option<Vec<u8>>> {
        let _writer = self.exclusive();
        let Some(mut meta) = self.live_typed(key, DataType::List, now_ms())? else {
            return Ok(None);
        };
        let slot = match end {
            End::Left => meta.head,
            End::Right => meta.tail - 1,
        };
        let suffix = slot.to_be_bytes();
        let value = self.get_subkey(key, meta.version, &suffix)?.ok_or_else(|| {
            StoreError::InvalidState(format!("list slot {} missing", slot))
        })?;

        let mut batch = WriteBatch::new();
        batch.delete(self.subkey(key, meta.version, &suffix));
        match end {
            End::Left => meta.head += 1,
            End::Right => meta.tail -= 1,
        }
        meta.size -= 1;
        if meta.size < 0 {
            return Err(StoreError::InvalidState("list size underflow".into()));
        }
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(Some(value))
    }

    /// Pushes each value to the front in turn. Returns the new length.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> StoreResult<u64> {
        self.push(key, values, End::Left)
    }

    /// Appends each value. Returns the new length.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> StoreResult<u64> {
        self.push(key, values, End::Right)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn lpop(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.pop(key, End::Left)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn rpop(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.pop(key, End::Right)
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn llen(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self
            .live_typed(key, DataType::List, now_ms())?
            .map(|meta| meta.size as u64)
            .unwrap_or(0))
    }

    /// Element at `index`; negative indices count from the end.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn lindex(&self, key: &[u8], index: i64) -> StoreResult<Option<Vec<u8>>> {
        let Some(meta) = self.live_typed(key, DataType::List, now_ms())? else {
            return Ok(None);
        };
        match normalize_index(index, meta.size) {
            Some(offset) => {
                let slot = meta.head + offset as u64;
                self.get_subkey(key, meta.version, &slot.to_be_bytes())
            }
            None => Ok(None),
        }
    }

    /// Elements in the inclusive range `[start, stop]`; negative indices
    /// count from the end.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>> {
        let Some(meta) = self.live_typed(key, DataType::List, now_ms())? else {
            return Ok(Vec::new());
        };
        let Some((first, last)) = normalize_range(start, stop, meta.size) else {
            return Ok(Vec::new());
        };
        let head = self.subkey(key, meta.version, b"");
        let from = self.subkey(key, meta.version, &(meta.head + first as u64).to_be_bytes());
        let to = self.subkey(key, meta.version, &(meta.head + last as u64 + 1).to_be_bytes());
        Ok(self
            .scan_subkey_range(&head, &from, &to)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidState` if the key does not
    /// exist or the index is out of range.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> StoreResult<()> {
        let _writer = self.exclusive();
        let meta = self
            .live_typed(key, DataType::List, now_ms())?
            .ok_or_else(|| StoreError::InvalidState("no such key".into()))?;
        let offset = normalize_index(index, meta.size)
            .ok_or_else(|| StoreError::InvalidState("index out of range".into()))?;
        let slot = meta.head + offset as u64;

        let mut batch = WriteBatch::new();
        batch.put(self.subkey(key, meta.version, &slot.to_be_bytes()), value);
        batch.touch(self.prefix(), key);
        self.commit(batch)?;
        Ok(())
    }

    /// Keeps only the inclusive range `[start, stop]`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<()> {
        let _writer = self.exclusive();
        let Some(mut meta) = self.live_typed(key, DataType::List, now_ms())? else {
            return Ok(());
        };
        let (new_head, new_tail) = match normalize_range(start, stop, meta.size) {
            Some((first, last)) => (meta.head + first as u64, meta.head + last as u64 + 1),
            None => (meta.tail, meta.tail),
        };

        let mut batch = WriteBatch::new();
        for slot in (meta.head..new_head).chain(new_tail..meta.tail) {
            batch.delete(self.subkey(key, meta.version, &slot.to_be_bytes()));
        }
        if batch.is_empty() {
            return Ok(());
        }
        meta.head = new_head;
        meta.tail = new_tail;
        meta.size = (new_tail - new_head) as i64;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(())
    }

    /// Replaces the whole list under a fresh version. Returns the new length.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn lreplace(&self, key: &[u8], values: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let current = self.current_typed(key, DataType::List, now_ms())?;
        let mut meta: Metadata = self.fresh(DataType::List, &current);
        meta.head = LIST_ORIGIN;
        meta.tail = LIST_ORIGIN;

        let mut batch = WriteBatch::new();
        for value in values {
            batch.put(self.subkey(key, meta.version, &meta.tail.to_be_bytes()), *value);
            meta.tail += 1;
        }
        meta.size = values.len() as i64;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(values.len() as u64)
    }
}
