mod writer_tests;

use memtable::Memtable;

/// Builds a subkey-shaped physical key: `[prefix][S][key_len][key][version][suffix]`.
pub(crate) fn subkey(user_key: &[u8], version: u64, suffix: &[u8]) -> Vec<u8> {
    let mut k = vec![0x00, 0x01, b'S'];
    k.extend_from_slice(&(user_key.len() as u32).to_be_bytes());
    k.extend_from_slice(user_key);
    k.extend_from_slice(&version.to_be_bytes());
    k.extend_from_slice(suffix);
    k
}

pub(crate) fn sample_memtable() -> Memtable {
    let mut m = Memtable::new();
    m.put(b"a".to_vec(), b"apple".to_vec(), 1);
    m.put(b"b".to_vec(), b"banana".to_vec(), 2);
    // present but empty
    m.put(b"c".to_vec(), b"".to_vec(), 3);
    m.delete(b"d".to_vec(), 4);
    m
}
