use super::*;
use crc32fast::Hasher as Crc32;
use std::io::Cursor;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn batch(seq: u64, ops: Vec<BatchOp>) -> WalRecord {
    WalRecord { seq, ops }
}

fn replay_all(path: &std::path::Path) -> Result<Vec<WalRecord>, WalError> {
    let mut reader = WalReader::open(path)?;
    let mut recs = Vec::new();
    reader.replay(|r| recs.push(r))?;
    Ok(recs)
}

fn replay_from_bytes(data: &[u8]) -> Result<Vec<WalRecord>, WalError> {
    let mut reader = WalReader::from_reader(Cursor::new(data.to_vec()));
    let mut recs = Vec::new();
    reader.replay(|r| recs.push(r))?;
    Ok(recs)
}

/// Encodes one record exactly like the writer does, without touching disk.
fn frame(record: &WalRecord) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(record.seq).unwrap();
    write_ops(&mut body, &record.ops).unwrap();
    let mut hasher = Crc32::new();
    hasher.update(&body);
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(body.len() as u32 + 4).unwrap();
    out.write_u32::<LittleEndian>(hasher.finalize()).unwrap();
    out.extend_from_slice(&body);
    out
}

// -------------------- Basic write & replay --------------------

#[test]
fn batches_replay_in_order_with_all_ops() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let first = batch(
        1,
        vec![
            BatchOp::put(b"meta:h", b"hash-v1"),
            BatchOp::put(b"sub:h:a", b"1"),
        ],
    );
    let second = batch(2, vec![BatchOp::del(b"sub:h:a"), BatchOp::put(b"sub:h:b", b"2")]);

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&first).unwrap();
        w.append(&second).unwrap();
    }

    assert_eq!(replay_all(&path).unwrap(), vec![first, second]);
}

#[test]
fn empty_batch_roundtrips() {
    let data = frame(&batch(9, vec![]));
    assert_eq!(replay_from_bytes(&data).unwrap(), vec![batch(9, vec![])]);
}

#[test]
fn append_to_existing_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append(&batch(1, vec![BatchOp::put(b"a", b"1")])).unwrap();
    }
    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append(&batch(2, vec![BatchOp::put(b"b", b"2")])).unwrap();
        w.sync_to_disk().unwrap();
    }

    let seqs: Vec<u64> = replay_all(&path).unwrap().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn open_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let res = WalReader::open(dir.path().join("absent.log"));
    assert!(matches!(res, Err(WalError::Io(_))));
}

#[test]
fn binary_keys_and_empty_values() {
    let rec = batch(
        u64::MAX,
        vec![
            BatchOp::put(&[0x00, 0x01, b'S', 0xff], b""),
            BatchOp::del(&[]),
        ],
    );
    assert_eq!(replay_from_bytes(&frame(&rec)).unwrap(), vec![rec]);
}

// -------------------- Atomicity under torn writes --------------------

#[test]
fn torn_batch_is_dropped_whole() {
    let complete = batch(1, vec![BatchOp::put(b"k1", b"v1")]);
    let torn = batch(
        2,
        vec![
            BatchOp::put(b"meta", b"new-version"),
            BatchOp::put(b"field-a", b"x"),
            BatchOp::put(b"field-b", b"y"),
        ],
    );

    let mut data = frame(&complete);
    let torn_bytes = frame(&torn);
    // every strict prefix of the second frame must yield only the first batch
    for cut in 1..torn_bytes.len() {
        let mut partial = data.clone();
        partial.extend_from_slice(&torn_bytes[..cut]);
        assert_eq!(
            replay_from_bytes(&partial).unwrap(),
            vec![complete.clone()],
            "cut at {}",
            cut
        );
    }

    data.extend_from_slice(&torn_bytes);
    assert_eq!(replay_from_bytes(&data).unwrap().len(), 2);
}

#[test]
fn replay_empty_input() {
    assert!(replay_from_bytes(&[]).unwrap().is_empty());
}

// -------------------- Corruption detection --------------------

#[test]
fn crc_mismatch_is_corruption() {
    let mut data = frame(&batch(1, vec![BatchOp::put(b"k", b"v")]));
    let last = data.len() - 1;
    data[last] ^= 0xff;
    assert!(matches!(replay_from_bytes(&data), Err(WalError::Corrupt)));
}

#[test]
fn undersized_record_len_is_corruption() {
    let mut data = Vec::new();
    data.write_u32::<LittleEndian>(4).unwrap();
    data.write_u32::<LittleEndian>(0).unwrap();
    assert!(matches!(replay_from_bytes(&data), Err(WalError::Corrupt)));
}

#[test]
fn unknown_op_code_is_corruption() {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(1).unwrap();
    body.write_u32::<LittleEndian>(1).unwrap();
    body.write_u8(7).unwrap();
    body.write_u32::<LittleEndian>(1).unwrap();
    body.push(b'k');

    let mut hasher = Crc32::new();
    hasher.update(&body);
    let mut data = Vec::new();
    data.write_u32::<LittleEndian>(body.len() as u32 + 4).unwrap();
    data.write_u32::<LittleEndian>(hasher.finalize()).unwrap();
    data.extend_from_slice(&body);

    assert!(matches!(replay_from_bytes(&data), Err(WalError::Corrupt)));
}

#[test]
fn op_count_larger_than_body_is_corruption() {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(1).unwrap();
    body.write_u32::<LittleEndian>(1_000_000).unwrap();

    let mut hasher = Crc32::new();
    hasher.update(&body);
    let mut data = Vec::new();
    data.write_u32::<LittleEndian>(body.len() as u32 + 4).unwrap();
    data.write_u32::<LittleEndian>(hasher.finalize()).unwrap();
    data.extend_from_slice(&body);

    assert!(matches!(replay_from_bytes(&data), Err(WalError::Corrupt)));
}

// -------------------- Op codec --------------------

#[test]
fn encoded_len_matches_codec_output() {
    let ops = vec![BatchOp::put(b"key", b"value"), BatchOp::del(b"gone")];
    let mut buf = Vec::new();
    write_ops(&mut buf, &ops).unwrap();
    let expected: usize = 4 + ops.iter().map(BatchOp::encoded_len).sum::<usize>();
    assert_eq!(buf.len(), expected);

    let decoded = read_ops(&mut buf.as_slice(), buf.len()).unwrap();
    assert_eq!(decoded, ops);
    assert_eq!(decoded[1].key(), b"gone");
}

// -------------------- Stress --------------------

#[test]
fn many_batches_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        for seq in 1..=500u64 {
            let ops = (0..(seq % 5) + 1)
                .map(|i| BatchOp::put(format!("k{}-{}", seq, i).as_bytes(), &seq.to_le_bytes()))
                .collect();
            w.append(&batch(seq, ops)).unwrap();
        }
        w.sync_to_disk().unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 500);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(rec.seq, i as u64 + 1);
        assert_eq!(rec.ops.len() as u64, (rec.seq % 5) + 1);
    }
}

// -------------------- Frames --------------------

#[test]
fn frame_reader_tells_end_from_torn() {
    let mut wire = Vec::new();
    frame::write_frame(&mut wire, b"abc").unwrap();
    frame::write_frame(&mut wire, b"defgh").unwrap();

    let mut cursor = Cursor::new(wire.clone());
    assert_eq!(
        frame::read_frame(&mut cursor, 1).unwrap(),
        FrameRead::Body(b"abc".to_vec())
    );
    assert_eq!(
        frame::read_frame(&mut cursor, 1).unwrap(),
        FrameRead::Body(b"defgh".to_vec())
    );
    assert_eq!(frame::read_frame(&mut cursor, 1).unwrap(), FrameRead::End);

    wire.truncate(wire.len() - 1);
    let mut cursor = Cursor::new(wire);
    frame::read_frame(&mut cursor, 1).unwrap();
    assert_eq!(frame::read_frame(&mut cursor, 1).unwrap(), FrameRead::Torn);
}

#[test]
fn frame_shorter_than_minimum_is_corrupt() {
    let mut wire = Vec::new();
    frame::write_frame(&mut wire, b"ab").unwrap();
    assert!(matches!(
        frame::read_frame(&mut Cursor::new(wire), 3),
        Err(WalError::Corrupt)
    ));
}
