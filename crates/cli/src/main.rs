//! # CLI - Eddy interactive shell
//!
//! A REPL over the Eddy store. Reads commands from stdin, runs them against
//! the selected namespace, and prints replies to stdout. Works interactively
//! and scripted (pipe commands via stdin). Logs go to stderr, filtered by
//! `RUST_LOG` (default `warn`).
//!
//! ## Commands
//!
//! ```text
//! SELECT ns | NAMESPACES | REGISTER token prefix | RETIRE token
//! SET key value | SETPX key ms value | SETNX | GET | GETSET | APPEND | STRLEN
//! INCR | DECR | INCRBY key n | MGET key... | MSET key value...
//! DEL key... | EXISTS key... | TYPE | EXPIRE key s | PEXPIRE key ms | TTL | PTTL
//! PERSIST | KEYS [prefix] | FLUSHDB
//! HSET key field value... | HGET | HDEL | HEXISTS | HLEN | HGETALL | HKEYS
//! HVALS | HMGET | HINCRBY key field n
//! LPUSH | RPUSH | LPOP | RPOP | LLEN | LINDEX | LRANGE | LSET | LTRIM
//! SADD | SREM | SCARD | SISMEMBER | SMEMBERS
//! ZADD key score member... | ZINCRBY | ZREM | ZSCORE | ZCARD | ZRANK
//! ZRANGE key start stop [WITHSCORES] | ZRANGEBYSCORE key min max | ZCOUNT
//! SETBIT key offset 0|1 | GETBIT | BITCOUNT
//! SWEEP | FLUSH | COMPACT | INFO | REPLSTATUS | PING | EXIT / QUIT
//! ```
//!
//! ## Configuration
//!
//! `EDDY_*` environment variables, see the `config` crate. With
//! `EDDY_REPL_LISTEN` set the shell also serves replication; with
//! `EDDY_REPL_UPSTREAM` set it follows that producer and refuses writes.
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p eddy-cli
//! Eddy started (seq=1, data_dir=data, namespaces=1, role=leader)
//! > HSET user:1 name Alice
//! (integer) 1
//! > HGET user:1 name
//! Alice
//! > EXIT
//! bye
//! ```

mod commands;

use anyhow::{Context, Result};
use config::Config;
use replication::{connect_tcp, follower, Follower, Producer, ReplicationLog};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use store::collector::{self, CollectorOptions};
use store::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::{Reply, Session};

/// Must exceed the longest fetch the producer may hold open.
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(35);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cfg = Config::from_env().context("reading EDDY_* configuration")?;
    let storage = Arc::new(
        Storage::open(&cfg)
            .with_context(|| format!("opening store in {}", cfg.data_dir.display()))?,
    );
    let following = cfg.repl_upstream.is_some();

    let log = match &cfg.repl_listen {
        Some(_) => Some(ReplicationLog::open(&storage, &cfg).with_context(|| {
            format!("opening replication journal in {}", cfg.repl_dir().display())
        })?),
        None => None,
    };

    let listener = match (&cfg.repl_listen, &log) {
        (Some(addr), Some(log)) => {
            let producer = Arc::new(Producer::new(Arc::clone(&storage), Arc::clone(log), &cfg));
            let handle = producer
                .listen(addr)
                .with_context(|| format!("binding replication listener on {addr}"))?;
            info!(addr = %handle.local_addr(), "serving replication");
            Some(handle)
        }
        _ => None,
    };

    let follower = match &cfg.repl_upstream {
        Some(upstream) => {
            let upstream = upstream.clone();
            let f = Follower::new(Arc::clone(&storage), &cfg)?;
            info!(%upstream, next = f.next_sequence(), "following upstream");
            Some(follower::spawn(f, move || {
                connect_tcp(upstream.as_str(), Some(UPSTREAM_READ_TIMEOUT))
            }))
        }
        None => None,
    };

    let sweep = CollectorOptions {
        active_expiry: cfg.active_expiry,
        ..CollectorOptions::default()
    };
    // a follower receives the leader's sweeps through replication
    let sweeper = match cfg.sweep_interval {
        Some(interval) if !following => Some(collector::spawn(Arc::clone(&storage), interval, sweep)),
        _ => None,
    };

    println!(
        "Eddy started (seq={}, data_dir={}, namespaces={}, role={})",
        storage.last_seq(),
        cfg.data_dir.display(),
        storage.namespaces().len(),
        if following { "follower" } else { "leader" }
    );
    print!("> ");
    io::stdout().flush().ok();

    let mut session = Session::new(Arc::clone(&storage), log, following, sweep);
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        if !line.trim().is_empty() {
            let reply = session.execute(&line);
            println!("{reply}");
            if reply == Reply::Exit {
                break;
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    if let Some(handle) = follower {
        handle.stop();
    }
    if let Some(handle) = sweeper {
        handle.stop();
    }
    if let Some(handle) = listener {
        handle.stop();
    }
    Ok(())
}
