//! Per-type operations on [`Database`](crate::Database).
//!
//! | Module     | Subkey suffix                                   |
//! |------------|-------------------------------------------------|
//! | `string`   | none, value is inline in the metadata           |
//! | `hash`     | field bytes → value                             |
//! | `set`      | member bytes → empty                            |
//! | `list`     | `u64 BE` slot → element                         |
//! | `zset`     | `'m'`+member → score, `'s'`+score+member → empty |
//! | `bitmap`   | `u32 BE` fragment index → fragment bytes        |

mod bitmap;
mod hash;
mod list;
mod set;
mod string;
mod zset;

pub use bitmap::FRAGMENT_BYTES;
pub use zset::ScoreBound;

use std::collections::BTreeMap;

use crate::batch::WriteBatch;
use crate::db::Database;
use crate::error::StoreResult;
use crate::metadata::{now_ms, DataType};

impl Database<'_> {
    /// Replaces the whole collection at `key` with `members` under a fresh
    /// version. Later duplicates win. Returns the new size.
    pub(crate) fn replace_members(
        &self,
        key: &[u8],
        data_type: DataType,
        members: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let current = self.current_typed(key, data_type, now_ms())?;
        let mut meta = self.fresh(data_type, &current);

        let unique: BTreeMap<Vec<u8>, Vec<u8>> = members.into_iter().collect();
        let mut batch = WriteBatch::new();
        for (suffix, value) in &unique {
            batch.put(self.subkey(key, meta.version, suffix), value.clone());
        }
        meta.size = unique.len() as i64;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(unique.len() as u64)
    }
}

/// Clamps a Redis-style inclusive `[start, stop]` to `[first, last]` slot
/// offsets, or `None` when the range is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: i64) -> Option<(i64, i64)> {
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start, stop))
    }
}

pub(crate) fn normalize_index(index: i64, len: i64) -> Option<i64> {
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::{normalize_index, normalize_range};

    #[test]
    fn range_normalization() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 4)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(normalize_range(1, 100, 5), Some((1, 4)));
        assert_eq!(normalize_range(-100, 1, 5), Some((0, 1)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(5, 10, 5), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn index_normalization() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
