use super::helpers::{follower, open, producer};
use crate::follower::spawn;
use crate::protocol::{read_frame, write_frame};
use crate::{connect_tcp, Progress, Request, Response, SyncTransport};
use anyhow::Result;
use config::RetentionPolicy;
use std::io::{self, Cursor, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// Scripted input, captured output.
struct Scripted {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Scripted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn serve_answers_each_request_and_survives_unknown_tags() -> Result<()> {
    let dir = tempdir()?;
    let storage = open(dir.path())?;
    let prod = producer(&storage, RetentionPolicy::default());
    storage.db("default")?.set(b"a", b"1")?;

    let mut input = Vec::new();
    write_frame(&mut input, &Request::Status.encode())?;
    write_frame(&mut input, &[0x7F])?;
    write_frame(
        &mut input,
        &Request::Fetch {
            next_sequence: prod.log().last_published(),
            max_entries: 10,
            max_wait_ms: 0,
        }
        .encode(),
    )?;

    let mut stream = Scripted {
        input: Cursor::new(input),
        output: Vec::new(),
    };
    prod.serve(&mut stream)?;

    let mut replies = Cursor::new(stream.output);
    let mut responses = Vec::new();
    while let Some(body) = read_frame(&mut replies)? {
        responses.push(Response::decode(&body)?);
    }
    assert_eq!(responses.len(), 3);
    assert!(matches!(&responses[0], Response::Status(s) if s.last_published == storage.last_seq()));
    assert!(matches!(&responses[1], Response::Error { .. }));
    assert!(matches!(&responses[2], Response::Entries { entries, .. } if entries.len() == 1));
    Ok(())
}

#[test]
fn follower_replicates_over_tcp() -> Result<()> {
    let (pdir, fdir) = (tempdir()?, tempdir()?);
    let leader = open(pdir.path())?;
    let prod = producer(&leader, RetentionPolicy::default());
    let listener = prod.clone().listen("127.0.0.1:0")?;

    let db = leader.db("default")?;
    db.hset(b"h", &[(b"f", b"v")])?;

    let replica = open(fdir.path())?;
    let mut f = follower(&replica)?;
    let mut transport = connect_tcp(listener.local_addr(), Some(Duration::from_secs(10)))?;

    assert!(matches!(f.poll(&mut transport)?, Progress::Resynced { .. }));
    db.zadd(b"z", &[(3.0, b"m")])?;
    assert!(matches!(
        f.poll(&mut transport)?,
        Progress::Applied { entries: 1, .. }
    ));
    assert!(matches!(f.poll(&mut transport)?, Progress::UpToDate { .. }));

    let rdb = replica.db("default")?;
    assert_eq!(rdb.hget(b"h", b"f")?, Some(b"v".to_vec()));
    assert_eq!(rdb.zscore(b"z", b"m")?, Some(3.0));

    match transport.call(&Request::Status)? {
        Response::Status(status) => assert_eq!(status.last_published, leader.last_seq()),
        other => anyhow::bail!("unexpected {other:?}"),
    }

    drop(transport);
    listener.stop();
    Ok(())
}

#[test]
fn background_follower_keeps_up() -> Result<()> {
    let (pdir, fdir) = (tempdir()?, tempdir()?);
    let leader = open(pdir.path())?;
    let prod = producer(&leader, RetentionPolicy::default());
    let listener = prod.clone().listen("127.0.0.1:0")?;
    let addr = listener.local_addr();

    let replica = open(fdir.path())?;
    let f = follower(&replica)?.with_max_wait(Duration::from_millis(100));
    let handle = spawn(f, move || connect_tcp(addr, Some(Duration::from_secs(5))));

    let db = leader.db("default")?;
    for i in 0..50u64 {
        db.rpush(b"l", &[i.to_string().as_bytes()])?;
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while replica.db("default")?.llen(b"l")? < 50 {
        assert!(Instant::now() < deadline, "follower did not catch up");
        thread::sleep(Duration::from_millis(20));
    }
    handle.stop();
    listener.stop();

    assert_eq!(replica.db("default")?.lindex(b"l", -1)?, Some(b"49".to_vec()));
    Ok(())
}
