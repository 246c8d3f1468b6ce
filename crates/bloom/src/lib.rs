//! # Bloom Filter
//!
//! Per-SSTable membership filter for the Eddy storage engine.
//!
//! Every SSTable embeds a filter built over its physical keys. Point lookups
//! (metadata records, hash fields, set members, sorted-set member scores) are
//! by far the most common read in the collection layer, and most of them miss
//! the older tables, so a negative answer here skips the index lookup and the
//! disk read entirely.
//!
//! The filter never yields a false negative. False positives are bounded by
//! the rate chosen at construction.
//!
//! ## Hashing
//!
//! One `xxh3_128` hash per key, split into two 64-bit halves `h1`/`h2`, and
//! the `k` bit positions are derived by double hashing:
//! `pos(i) = (h1 + i * h2) mod m`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_128;

/// Upper bound on a serialized filter (128 MiB). Guards against corrupt
/// length fields allocating absurd buffers.
const MAX_BLOOM_WORDS: usize = 16 * 1024 * 1024;

/// A bloom filter backed by a packed `u64` bit array.
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the target
    /// `false_positive_rate`.
    ///
    /// Sizing follows `bits_per_key = -1.44 * log2(p)` and
    /// `k = bits_per_key * ln 2`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items as f64) * bits_per_key).ceil() as u64;
        let num_bits = num_bits.max(64);

        let num_hashes = (bits_per_key * std::f64::consts::LN_2).ceil() as u32;
        let num_hashes = num_hashes.max(1);

        let num_words = num_bits.div_ceil(64) as usize;

        Self {
            words: vec![0u64; num_words],
            num_bits,
            num_hashes,
        }
    }

    /// Inserts a key into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.words[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// Returns `false` if the key is definitely absent, `true` if it may be
    /// present.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.words[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
        })
    }

    /// Number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of bit positions set per key.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serialized size in bytes: `num_bits(u64) + num_hashes(u32) + words_len(u32) + words`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 4 + self.words.len() * 8
    }

    /// Serializes the filter.
    ///
    /// ```text
    /// [num_bits: u64 LE][num_hashes: u32 LE][words_len: u32 LE][words: u64 LE ...]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u32::<LittleEndian>(self.words.len() as u32)?;
        for word in &self.words {
            w.write_u64::<LittleEndian>(*word)?;
        }
        Ok(())
    }

    /// Deserializes a filter written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let words_len = r.read_u32::<LittleEndian>()? as usize;

        if words_len > MAX_BLOOM_WORDS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} words", words_len),
            ));
        }
        if num_bits == 0 || num_bits > (words_len as u64) * 64 || num_hashes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bloom filter header inconsistent with bit array",
            ));
        }

        let mut words = vec![0u64; words_len];
        r.read_u64_into::<LittleEndian>(&mut words)?;

        Ok(Self {
            words,
            num_bits,
            num_hashes,
        })
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Splits one 128-bit xxh3 digest into the two double-hashing seeds.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let digest = xxh3_128(key);
    (digest as u64, (digest >> 64) as u64)
}

#[cfg(test)]
mod tests;
