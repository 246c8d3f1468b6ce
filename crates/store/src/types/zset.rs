//! Sorted sets. Each member has two subkeys under the same version:
//!
//! ```text
//! 'm' + member                → encoded score
//! 's' + encoded score + member → (empty)
//! ```
//!
//! The score encoding sorts like `f64::total_cmp`, so the `'s'` space is in
//! (score, member) order and range queries are plain scans.

use std::collections::BTreeMap;

use crate::batch::WriteBatch;
use crate::codec::{decode_score, encode_score, prefix_successor};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{now_ms, DataType, Metadata};
use crate::types::normalize_range;

const MEMBER_SPACE: u8 = b'm';
const SCORE_SPACE: u8 = b's';

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    fn value(self) -> f64 {
        match self {
            ScoreBound::Inclusive(v) | ScoreBound::Exclusive(v) => v,
        }
    }

    fn admits_above(self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
        }
    }

    fn admits_below(self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
        }
    }
}

fn member_suffix(member: &[u8]) -> Vec<u8> {
    let mut suffix = Vec::with_capacity(1 + member.len());
    suffix.push(MEMBER_SPACE);
    suffix.extend_from_slice(member);
    suffix
}

fn score_suffix(score: f64, member: &[u8]) -> Vec<u8> {
    let mut suffix = Vec::with_capacity(9 + member.len());
    suffix.push(SCORE_SPACE);
    suffix.extend_from_slice(&encode_score(score));
    suffix.extend_from_slice(member);
    suffix
}

/// Rejects NaN and folds `-0.0` into `0.0` so equal scores encode equally.
fn check_score(score: f64) -> StoreResult<f64> {
    if score.is_nan() {
        return Err(StoreError::InvalidArgument("score is not a number".into()));
    }
    Ok(if score == 0.0 { 0.0 } else { score })
}

impl Database<'_> {
    /// Every `(member, score)` of `meta`'s version in score order.
    fn zscan(&self, key: &[u8], meta: &Metadata) -> StoreResult<Vec<(Vec<u8>, f64)>> {
        self.scan_subkeys(key, meta.version, &[SCORE_SPACE])?
            .into_iter()
            .map(|(suffix, _)| {
                let score = decode_score(&suffix[1..])?;
                Ok((suffix[9..].to_vec(), score))
            })
            .collect()
    }

    fn zscore_at(&self, key: &[u8], version: u64, member: &[u8]) -> StoreResult<Option<f64>> {
        match self.get_subkey(key, version, &member_suffix(member))? {
            Some(bytes) => Ok(Some(decode_score(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes `member` at `score` into `batch`, replacing `old` if given.
    fn zwrite(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        version: u64,
        member: &[u8],
        score: f64,
        old: Option<f64>,
    ) {
        if let Some(old) = old {
            batch.delete(self.subkey(key, version, &score_suffix(old, member)));
        }
        batch.put(
            self.subkey(key, version, &member_suffix(member)),
            encode_score(score).to_vec(),
        );
        batch.put(self.subkey(key, version, &score_suffix(score, member)), Vec::new());
    }

    /// Adds members or updates their scores. Returns how many were new.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` for a NaN score.
    pub fn zadd(&self, key: &[u8], entries: &[(f64, &[u8])]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut unique: BTreeMap<&[u8], f64> = BTreeMap::new();
        for (score, member) in entries {
            unique.insert(*member, check_score(*score)?);
        }

        let mut meta = self.open_or_create(key, DataType::ZSet, now_ms())?;
        let has_members = meta.size > 0;
        let mut batch = WriteBatch::new();
        let mut added = 0i64;
        for (member, score) in unique {
            let old = if has_members {
                self.zscore_at(key, meta.version, member)?
            } else {
                None
            };
            match old {
                Some(old) if old.to_bits() == score.to_bits() => continue,
                Some(_) => {}
                None => added += 1,
            }
            self.zwrite(&mut batch, key, meta.version, member, score, old);
        }
        if batch.is_empty() {
            return Ok(0);
        }
        meta.size += added;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(added as u64)
    }

    /// Adds `delta` to `member`'s score (absent counts as 0). Returns the new score.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` if the delta or
    /// the result is NaN.
    pub fn zincr_by(&self, key: &[u8], delta: f64, member: &[u8]) -> StoreResult<f64> {
        let _writer = self.exclusive();
        let delta = check_score(delta)?;
        let mut meta = self.open_or_create(key, DataType::ZSet, now_ms())?;
        let old = if meta.size > 0 {
            self.zscore_at(key, meta.version, member)?
        } else {
            None
        };
        let score = check_score(old.unwrap_or(0.0) + delta)?;

        let mut batch = WriteBatch::new();
        self.zwrite(&mut batch, key, meta.version, member, score, old);
        if old.is_none() {
            meta.size += 1;
        }
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(score)
    }

    /// Removes members. Returns how many were present.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidState` on size underflow.
    pub fn zrem(&self, key: &[u8], members: &[&[u8]]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let Some(mut meta) = self.live_typed(key, DataType::ZSet, now_ms())? else {
            return Ok(0);
        };
        let mut batch = WriteBatch::new();
        let mut removed = 0i64;
        let mut seen = std::collections::BTreeSet::new();
        for member in members {
            if !seen.insert(*member) {
                continue;
            }
            if let Some(score) = self.zscore_at(key, meta.version, member)? {
                batch.delete(self.subkey(key, meta.version, &member_suffix(member)));
                batch.delete(self.subkey(key, meta.version, &score_suffix(score, member)));
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed;
        if meta.size < 0 {
            return Err(StoreError::InvalidState(format!(
                "zset size underflow ({})",
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
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        match self.live_typed(key, DataType::ZSet, now_ms())? {
            Some(meta) => self.zscore_at(key, meta.version, member),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn zcard(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self
            .live_typed(key, DataType::ZSet, now_ms())?
            .map(|meta| meta.size as u64)
            .unwrap_or(0))
    }

    /// 0-based position of `member` in (score, member) order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<u64>> {
        let Some(meta) = self.live_typed(key, DataType::ZSet, now_ms())? else {
            return Ok(None);
        };
        let Some(score) = self.zscore_at(key, meta.version, member)? else {
            return Ok(None);
        };
        let head = self.subkey(key, meta.version, b"");
        let from = self.subkey(key, meta.version, &[SCORE_SPACE]);
        let to = self.subkey(key, meta.version, &score_suffix(score, member));
        Ok(Some(self.scan_subkey_range(&head, &from, &to)?.len() as u64))
    }

    /// Members by rank in the inclusive range `[start, stop]`; negative
    /// indices count from the end.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `key` holds another type.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<(Vec<u8>, f64)>> {
        let Some(meta) = self.live_typed(key, DataType::ZSet, now_ms())? else {
            return Ok(Vec::new());
        };
        let Some((first, last)) = normalize_range(start, stop, meta.size) else {
            return Ok(Vec::new());
        };
        Ok(self
            .zscan(key, &meta)?
            .into_iter()
            .skip(first as usize)
            .take((last - first + 1) as usize)
            .collect())
    }

    /// Members with `min <= score <= max` (bounds may be exclusive), in order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` for a NaN bound.
    pub fn zrange_by_score(
        &self,
        key: &[u8],
        min: ScoreBound,
        max: ScoreBound,
    ) -> StoreResult<Vec<(Vec<u8>, f64)>> {
        let lo = check_score(min.value())?;
        let hi = check_score(max.value())?;
        let Some(meta) = self.live_typed(key, DataType::ZSet, now_ms())? else {
            return Ok(Vec::new());
        };
        if lo.total_cmp(&hi).is_gt() {
            return Ok(Vec::new());
        }

        let head = self.subkey(key, meta.version, b"");
        let mut from_suffix = vec![SCORE_SPACE];
        from_suffix.extend_from_slice(&encode_score(lo));
        let mut to_suffix = vec![SCORE_SPACE];
        to_suffix.extend_from_slice(&encode_score(hi));

        let from = self.subkey(key, meta.version, &from_suffix);
        let to = prefix_successor(&self.subkey(key, meta.version, &to_suffix));

        let mut out = Vec::new();
        for (suffix, _) in self.scan_subkey_range(&head, &from, &to)? {
            let score = decode_score(&suffix[1..])?;
            if min.admits_above(score) && max.admits_below(score) {
                out.push((suffix[9..].to_vec(), score));
            }
        }
        Ok(out)
    }

    /// Number of members in the score range.
    ///
    /// # Errors
    ///
    /// Same as [`zrange_by_score`](Self::zrange_by_score).
    pub fn zcount(&self, key: &[u8], min: ScoreBound, max: ScoreBound) -> StoreResult<u64> {
        Ok(self.zrange_by_score(key, min, max)?.len() as u64)
    }

    /// Replaces the whole sorted set under a fresh version. Returns the new size.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for another type, `InvalidArgument` for a NaN score.
    pub fn zreplace(&self, key: &[u8], entries: &[(f64, &[u8])]) -> StoreResult<u64> {
        let _writer = self.exclusive();
        let mut unique: BTreeMap<&[u8], f64> = BTreeMap::new();
        for (score, member) in entries {
            unique.insert(*member, check_score(*score)?);
        }
        let current = self.current_typed(key, DataType::ZSet, now_ms())?;
        let mut meta = self.fresh(DataType::ZSet, &current);

        let mut batch = WriteBatch::new();
        for (member, score) in &unique {
            self.zwrite(&mut batch, key, meta.version, member, *score, None);
        }
        meta.size = unique.len() as i64;
        self.put_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(unique.len() as u64)
    }
}
