use super::*;
use std::io::Cursor;

/// Builds a key shaped like a hash-field subkey: prefix, kind, key, version, field.
fn field_key(user_key: &str, version: u64, field: u32) -> Vec<u8> {
    let mut k = vec![0x00, 0x01, b'S'];
    k.extend_from_slice(&(user_key.len() as u32).to_be_bytes());
    k.extend_from_slice(user_key.as_bytes());
    k.extend_from_slice(&version.to_be_bytes());
    k.extend_from_slice(format!("field{}", field).as_bytes());
    k
}

// -------------------- Construction --------------------

#[test]
fn sizing_follows_target_rate() {
    let loose = BloomFilter::new(1000, 0.05);
    let tight = BloomFilter::new(1000, 0.0001);
    assert!(tight.num_bits() > loose.num_bits());
    assert!(tight.num_hashes() > loose.num_hashes());
    assert!(loose.num_bits() >= 64);
}

#[test]
#[should_panic(expected = "expected_items must be > 0")]
fn new_panics_on_zero_items() {
    BloomFilter::new(0, 0.01);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_out_of_range_rate() {
    BloomFilter::new(100, 1.0);
}

// -------------------- Membership --------------------

#[test]
fn every_inserted_subkey_is_found() {
    let mut bf = BloomFilter::new(2000, 0.01);
    for i in 0..2000 {
        bf.insert(&field_key("profile", 7, i));
    }
    for i in 0..2000 {
        assert!(bf.may_contain(&field_key("profile", 7, i)), "field {} lost", i);
    }
}

#[test]
fn stale_version_subkeys_mostly_miss() {
    let n = 10_000;
    let mut bf = BloomFilter::new(n as usize, 0.01);
    for i in 0..n {
        bf.insert(&field_key("profile", 8, i));
    }

    // Same fields under the previous version: different physical keys.
    let false_positives = (0..n)
        .filter(|i| bf.may_contain(&field_key("profile", 7, *i)))
        .count();

    let rate = false_positives as f64 / n as f64;
    assert!(rate < 0.03, "false positive rate too high: {:.4}", rate);
}

#[test]
fn empty_filter_contains_nothing() {
    let bf = BloomFilter::new(16, 0.01);
    assert!(!bf.may_contain(b"anything"));
    assert!(!bf.may_contain(b""));
}

// -------------------- Serialization --------------------

#[test]
fn serialized_filter_answers_identically() {
    let mut bf = BloomFilter::new(500, 0.01);
    for i in 0..500 {
        bf.insert(&field_key("cart", 1, i));
    }

    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();
    assert_eq!(buf.len(), bf.serialized_size());

    let restored = BloomFilter::read_from(&mut Cursor::new(&buf)).unwrap();
    assert_eq!(restored.num_bits(), bf.num_bits());
    assert_eq!(restored.num_hashes(), bf.num_hashes());
    assert_eq!(restored.words, bf.words);
    for i in 0..500 {
        assert!(restored.may_contain(&field_key("cart", 1, i)));
    }
}

#[test]
fn read_rejects_oversized_word_count() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&64u64.to_le_bytes());
    buf.extend_from_slice(&3u32.to_le_bytes());
    buf.extend_from_slice(&u32::MAX.to_le_bytes());

    assert!(BloomFilter::read_from(&mut Cursor::new(&buf)).is_err());
}

#[test]
fn read_rejects_bit_count_beyond_words() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&1000u64.to_le_bytes()); // needs 16 words
    buf.extend_from_slice(&3u32.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());

    assert!(BloomFilter::read_from(&mut Cursor::new(&buf)).is_err());
}

#[test]
fn read_rejects_truncated_words() {
    let bf = BloomFilter::new(100, 0.01);
    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();
    buf.truncate(buf.len() - 3);

    assert!(BloomFilter::read_from(&mut Cursor::new(&buf)).is_err());
}

#[test]
fn debug_reports_shape() {
    let bf = BloomFilter::new(100, 0.01);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("num_bits"));
    assert!(debug.contains("num_hashes"));
}
