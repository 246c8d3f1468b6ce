//! Atomic write batch.
//!
//! A batch collects physical puts and deletes plus the logical keys they
//! touch. Nothing is visible until [`Storage::commit`](crate::Storage::commit)
//! writes the whole batch as one engine record.

use engine::BatchOp;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    touched: Vec<(u16, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Del { key: key.into() });
    }

    /// Records that the batch changes logical `key` in namespace `prefix`.
    pub fn touch(&mut self, prefix: u16, key: &[u8]) {
        if !self.touched.iter().any(|(p, k)| *p == prefix && k == key) {
            self.touched.push((prefix, key.to_vec()));
        }
    }

    /// Appends every op of `other` after this batch's ops.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
        for (prefix, key) in other.touched {
            self.touch(prefix, &key);
        }
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn touched(&self) -> &[(u16, Vec<u8>)] {
        &self.touched
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl From<Vec<BatchOp>> for WriteBatch {
    fn from(ops: Vec<BatchOp>) -> Self {
        Self {
            ops,
            touched: Vec::new(),
        }
    }
}
