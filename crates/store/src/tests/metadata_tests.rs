use crate::metadata::*;
use crate::StoreError;
use anyhow::Result;

#[test]
fn list_record_round_trip() -> Result<()> {
    let mut meta = Metadata::new(DataType::List, 42);
    meta.expire_at = Some(1_700_000_000_000);
    meta.size = 3;
    meta.head = LIST_ORIGIN - 1;
    meta.tail = LIST_ORIGIN + 2;
    assert_eq!(Metadata::decode(&meta.encode())?, meta);
    Ok(())
}

#[test]
fn string_payload_is_inline() -> Result<()> {
    let mut meta = Metadata::new(DataType::String, 1);
    meta.payload = b"hello".to_vec();
    meta.size = 5;
    let bytes = meta.encode();
    assert_eq!(bytes.len(), 25 + 5);
    assert_eq!(Metadata::decode(&bytes)?.payload, b"hello".to_vec());
    Ok(())
}

#[test]
fn zero_expiry_means_none() -> Result<()> {
    let meta = Metadata::new(DataType::Hash, 9);
    let decoded = Metadata::decode(&meta.encode())?;
    assert_eq!(decoded.expire_at, None);
    Ok(())
}

#[test]
fn decode_rejects_garbage() {
    assert!(matches!(
        Metadata::decode(b"\x02short"),
        Err(StoreError::MalformedKey(_))
    ));
    let mut bytes = Metadata::new(DataType::Set, 1).encode();
    bytes[0] = 99;
    assert!(Metadata::decode(&bytes).is_err());

    // a list record without head/tail
    let list = Metadata::new(DataType::List, 1).encode();
    assert!(Metadata::decode(&list[..25]).is_err());
}

#[test]
fn liveness_rules() {
    let now = 1_000;

    let mut hash = Metadata::new(DataType::Hash, 1);
    assert!(!hash.is_live(now), "empty collection reads as absent");
    hash.size = 2;
    assert!(hash.is_live(now));
    hash.expire_at = Some(now);
    assert!(!hash.is_live(now), "expiry is inclusive");

    // an empty string is still a string
    let empty = Metadata::new(DataType::String, 1);
    assert!(empty.is_live(now));

    assert!(!Metadata::none().is_live(now));
}

#[test]
fn version_clock_is_strictly_increasing() {
    let clock = VersionClock::new();
    let mut last = 0;
    for _ in 0..1000 {
        let v = clock.next_after(0);
        assert!(v > last);
        last = v;
    }
    assert_eq!(clock.last(), last);
}

#[test]
fn version_clock_jumps_past_current() {
    let clock = VersionClock::new();
    let far = u64::MAX / 2;
    assert!(clock.next_after(far) > far);
    // later versions stay above it even for smaller inputs
    assert!(clock.next_after(1) > far);
}

#[test]
fn version_clock_starts_near_wall_clock() {
    let clock = VersionClock::new();
    let micros = now_ms() * 1000;
    assert!(clock.next_after(0) >= micros);
}

#[test]
fn type_names() {
    assert_eq!(DataType::ZSet.name(), "zset");
    assert_eq!(DataType::from_u8(DataType::Bitmap as u8), Some(DataType::Bitmap));
    assert_eq!(DataType::from_u8(200), None);
    assert!(!DataType::String.is_collection());
    assert!(DataType::List.is_collection());
}
