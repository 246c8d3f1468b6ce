//! Shell commands: parsing, dispatch and reply formatting.

use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use store::collector::{CollectorOptions, OrphanCollector};
use store::{Database, ScoreBound, Storage, StoreError};
use tracing::error;

use replication::{applied_sequence, ReplicationLog};

/// What a command prints.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Nil,
    Int(i64),
    Bulk(Vec<u8>),
    Float(f64),
    List(Vec<Reply>),
    Text(String),
    Error(String),
    Exit,
}

impl Reply {
    fn bulk_or_nil(value: Option<Vec<u8>>) -> Self {
        value.map(Reply::Bulk).unwrap_or(Reply::Nil)
    }

    fn bulks(values: Vec<Vec<u8>>) -> Self {
        Reply::List(values.into_iter().map(Reply::Bulk).collect())
    }

    fn int(n: u64) -> Self {
        Reply::Int(n as i64)
    }

    fn flag(b: bool) -> Self {
        Reply::Int(i64::from(b))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Int(n) => write!(f, "(integer) {n}"),
            Reply::Bulk(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Reply::Float(x) => write!(f, "{x}"),
            Reply::List(items) if items.is_empty() => write!(f, "(empty)"),
            Reply::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {item}", i + 1)?;
                }
                Ok(())
            }
            Reply::Text(s) => write!(f, "{s}"),
            Reply::Error(msg) if msg.starts_with("WRONGTYPE") => write!(f, "{msg}"),
            Reply::Error(msg) => write!(f, "ERR {msg}"),
            Reply::Exit => write!(f, "bye"),
        }
    }
}

/// Commands refused on a follower.
const WRITE_COMMANDS: &[&str] = &[
    "SET", "SETNX", "SETPX", "GETSET", "APPEND", "INCR", "DECR", "INCRBY", "MSET", "DEL",
    "EXPIRE", "PEXPIRE", "PERSIST", "FLUSHDB", "HSET", "HDEL", "HINCRBY", "LPUSH", "RPUSH",
    "LPOP", "RPOP", "LSET", "LTRIM", "SADD", "SREM", "ZADD", "ZINCRBY", "ZREM", "SETBIT",
    "REGISTER", "RETIRE", "SWEEP",
];

/// One shell session: a selected namespace over shared storage.
pub struct Session {
    storage: Arc<Storage>,
    namespace: String,
    log: Option<Arc<ReplicationLog>>,
    follower: bool,
    sweep: CollectorOptions,
}

impl Session {
    pub fn new(
        storage: Arc<Storage>,
        log: Option<Arc<ReplicationLog>>,
        follower: bool,
        sweep: CollectorOptions,
    ) -> Self {
        let namespace = storage
            .namespaces()
            .first()
            .map(|ns| ns.token().to_string())
            .unwrap_or_else(|| "default".to_string());
        Self {
            storage,
            namespace,
            log,
            follower,
            sweep,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs one input line. Errors become [`Reply::Error`].
    pub fn execute(&mut self, line: &str) -> Reply {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((cmd, rest)) = args.split_first() else {
            return Reply::Text(String::new());
        };
        let cmd = cmd.to_uppercase();
        if self.follower && WRITE_COMMANDS.contains(&cmd.as_str()) {
            return Reply::Error("read-only replica".into());
        }

        match self.dispatch(&cmd, rest) {
            Ok(reply) => reply,
            Err(e) => {
                if let Some(store_err) = e.downcast_ref::<StoreError>() {
                    if !store_err.is_user_error() {
                        error!(command = %cmd, error = %store_err, "command failed");
                    }
                }
                Reply::Error(format!("{e:#}"))
            }
        }
    }

    fn dispatch(&mut self, cmd: &str, args: &[&str]) -> Result<Reply> {
        match cmd {
            "EXIT" | "QUIT" => Ok(Reply::Exit),
            "PING" => Ok(Reply::Text("PONG".into())),
            "SELECT" => {
                arity(args, 1, "SELECT namespace")?;
                self.storage.db(args[0])?;
                self.namespace = args[0].to_string();
                Ok(Reply::Ok)
            }
            "NAMESPACES" => Ok(Reply::List(
                self.storage
                    .namespaces()
                    .iter()
                    .map(|ns| Reply::Text(ns.to_string()))
                    .collect(),
            )),
            "REGISTER" => {
                arity(args, 2, "REGISTER token prefix")?;
                let prefix = parse_prefix(args[1])?;
                let ns = self.storage.register_namespace(args[0], prefix)?;
                Ok(Reply::Text(ns.to_string()))
            }
            "RETIRE" => {
                arity(args, 1, "RETIRE token")?;
                self.storage.retire_namespace(args[0])?;
                Ok(Reply::Ok)
            }
            "SWEEP" => {
                let stats = OrphanCollector::new(&self.storage, self.sweep).sweep()?;
                Ok(Reply::Text(format!(
                    "scanned={} orphans={} expired={} retired={}",
                    stats.scanned, stats.orphans, stats.expired, stats.retired
                )))
            }
            "FLUSH" => {
                self.storage.flush()?;
                Ok(self.levels())
            }
            "COMPACT" => {
                self.storage.compact()?;
                Ok(self.levels())
            }
            "INFO" | "STATS" => {
                let stats = self.storage.stats();
                Ok(Reply::Text(format!(
                    "last_seq={}\nmemtable_entries={}\nmemtable_bytes={}\nl0_tables={}\nl1_tables={}\nnamespaces={}\nnamespace={}\nrole={}",
                    stats.last_seq,
                    stats.memtable_entries,
                    stats.memtable_bytes,
                    stats.l0_tables,
                    stats.l1_tables,
                    stats.namespaces,
                    self.namespace,
                    if self.follower { "follower" } else { "leader" },
                )))
            }
            "REPLSTATUS" => self.repl_status(),
            _ => {
                let storage = Arc::clone(&self.storage);
                let db = storage.db(&self.namespace)?;
                data_command(&db, cmd, args)
            }
        }
    }

    fn levels(&self) -> Reply {
        let stats = self.storage.stats();
        Reply::Text(format!("OK (L0={}, L1={})", stats.l0_tables, stats.l1_tables))
    }

    fn repl_status(&self) -> Result<Reply> {
        if self.follower {
            return Ok(Reply::Text(format!(
                "role=follower applied={}",
                applied_sequence(&self.storage)?
            )));
        }
        match &self.log {
            Some(log) => {
                let status = log.status();
                Ok(Reply::Text(format!(
                    "role=leader last_published={} retention_floor={} retained_entries={} retained_bytes={}",
                    status.last_published,
                    status.retention_floor,
                    status.retained_entries,
                    status.retained_bytes
                )))
            }
            None => Ok(Reply::Text("replication disabled".into())),
        }
    }
}

fn data_command(db: &Database<'_>, cmd: &str, args: &[&str]) -> Result<Reply> {
    match cmd {
        // strings
        "SET" => {
            at_least(args, 2, "SET key value")?;
            db.set(b(args[0]), args[1..].join(" ").as_bytes())?;
            Ok(Reply::Ok)
        }
        "SETPX" => {
            arity(args, 3, "SETPX key millis value")?;
            db.set_with_ttl(b(args[0]), b(args[2]), parse(args[1], "millis")?)?;
            Ok(Reply::Ok)
        }
        "SETNX" => {
            arity(args, 2, "SETNX key value")?;
            Ok(Reply::flag(db.set_nx(b(args[0]), b(args[1]))?))
        }
        "GET" => {
            arity(args, 1, "GET key")?;
            Ok(Reply::bulk_or_nil(db.get(b(args[0]))?))
        }
        "GETSET" => {
            arity(args, 2, "GETSET key value")?;
            Ok(Reply::bulk_or_nil(db.get_set(b(args[0]), b(args[1]))?))
        }
        "APPEND" => {
            arity(args, 2, "APPEND key value")?;
            Ok(Reply::int(db.append(b(args[0]), b(args[1]))?))
        }
        "STRLEN" => {
            arity(args, 1, "STRLEN key")?;
            Ok(Reply::int(db.strlen(b(args[0]))?))
        }
        "INCR" | "DECR" => {
            arity(args, 1, "INCR key")?;
            let delta = if cmd == "INCR" { 1 } else { -1 };
            Ok(Reply::Int(db.incr_by(b(args[0]), delta)?))
        }
        "INCRBY" => {
            arity(args, 2, "INCRBY key delta")?;
            Ok(Reply::Int(db.incr_by(b(args[0]), parse(args[1], "delta")?)?))
        }
        "MGET" => {
            at_least(args, 1, "MGET key [key ...]")?;
            Ok(Reply::List(
                db.mget(&bytes(args))?
                    .into_iter()
                    .map(Reply::bulk_or_nil)
                    .collect(),
            ))
        }
        "MSET" => {
            let pairs = pairs(args, "MSET key value [key value ...]")?;
            db.mset(&pairs)?;
            Ok(Reply::Ok)
        }

        // keys
        "DEL" => {
            at_least(args, 1, "DEL key [key ...]")?;
            Ok(Reply::int(db.del(&bytes(args))?))
        }
        "EXISTS" => {
            at_least(args, 1, "EXISTS key [key ...]")?;
            Ok(Reply::int(db.exists(&bytes(args))?))
        }
        "TYPE" => {
            arity(args, 1, "TYPE key")?;
            Ok(Reply::Text(db.type_of(b(args[0]))?.name().to_string()))
        }
        "EXPIRE" | "PEXPIRE" => {
            arity(args, 2, "EXPIRE key ttl")?;
            let ttl: i64 = parse(args[1], "ttl")?;
            let ttl_ms = if cmd == "EXPIRE" {
                ttl.saturating_mul(1000)
            } else {
                ttl
            };
            Ok(Reply::flag(db.expire(b(args[0]), ttl_ms)?))
        }
        "TTL" | "PTTL" => {
            arity(args, 1, "TTL key")?;
            let ms = db.ttl(b(args[0]))?;
            Ok(Reply::Int(if cmd == "TTL" && ms >= 0 {
                (ms + 999) / 1000
            } else {
                ms
            }))
        }
        "PERSIST" => {
            arity(args, 1, "PERSIST key")?;
            Ok(Reply::flag(db.persist(b(args[0]))?))
        }
        "KEYS" => {
            let prefix = args.first().copied().unwrap_or("");
            Ok(Reply::bulks(db.keys(b(prefix))?))
        }
        "FLUSHDB" => Ok(Reply::int(db.flushdb()?)),

        // hashes
        "HSET" => {
            at_least(args, 3, "HSET key field value [field value ...]")?;
            let fields = pairs(&args[1..], "HSET key field value [field value ...]")?;
            Ok(Reply::int(db.hset(b(args[0]), &fields)?))
        }
        "HGET" => {
            arity(args, 2, "HGET key field")?;
            Ok(Reply::bulk_or_nil(db.hget(b(args[0]), b(args[1]))?))
        }
        "HDEL" => {
            at_least(args, 2, "HDEL key field [field ...]")?;
            Ok(Reply::int(db.hdel(b(args[0]), &bytes(&args[1..]))?))
        }
        "HEXISTS" => {
            arity(args, 2, "HEXISTS key field")?;
            Ok(Reply::flag(db.hexists(b(args[0]), b(args[1]))?))
        }
        "HLEN" => {
            arity(args, 1, "HLEN key")?;
            Ok(Reply::int(db.hlen(b(args[0]))?))
        }
        "HGETALL" => {
            arity(args, 1, "HGETALL key")?;
            Ok(Reply::List(
                db.hgetall(b(args[0]))?
                    .into_iter()
                    .flat_map(|(f, v)| [Reply::Bulk(f), Reply::Bulk(v)])
                    .collect(),
            ))
        }
        "HKEYS" => {
            arity(args, 1, "HKEYS key")?;
            Ok(Reply::bulks(db.hkeys(b(args[0]))?))
        }
        "HVALS" => {
            arity(args, 1, "HVALS key")?;
            Ok(Reply::bulks(db.hvals(b(args[0]))?))
        }
        "HMGET" => {
            at_least(args, 2, "HMGET key field [field ...]")?;
            Ok(Reply::List(
                db.hmget(b(args[0]), &bytes(&args[1..]))?
                    .into_iter()
                    .map(Reply::bulk_or_nil)
                    .collect(),
            ))
        }
        "HINCRBY" => {
            arity(args, 3, "HINCRBY key field delta")?;
            Ok(Reply::Int(db.hincr_by(
                b(args[0]),
                b(args[1]),
                parse(args[2], "delta")?,
            )?))
        }

        // lists
        "LPUSH" | "RPUSH" => {
            at_least(args, 2, "LPUSH key value [value ...]")?;
            let values = bytes(&args[1..]);
            let len = if cmd == "LPUSH" {
                db.lpush(b(args[0]), &values)?
            } else {
                db.rpush(b(args[0]), &values)?
            };
            Ok(Reply::int(len))
        }
        "LPOP" | "RPOP" => {
            arity(args, 1, "LPOP key")?;
            let popped = if cmd == "LPOP" {
                db.lpop(b(args[0]))?
            } else {
                db.rpop(b(args[0]))?
            };
            Ok(Reply::bulk_or_nil(popped))
        }
        "LLEN" => {
            arity(args, 1, "LLEN key")?;
            Ok(Reply::int(db.llen(b(args[0]))?))
        }
        "LINDEX" => {
            arity(args, 2, "LINDEX key index")?;
            Ok(Reply::bulk_or_nil(
                db.lindex(b(args[0]), parse(args[1], "index")?)?,
            ))
        }
        "LRANGE" => {
            arity(args, 3, "LRANGE key start stop")?;
            Ok(Reply::bulks(db.lrange(
                b(args[0]),
                parse(args[1], "start")?,
                parse(args[2], "stop")?,
            )?))
        }
        "LSET" => {
            arity(args, 3, "LSET key index value")?;
            db.lset(b(args[0]), parse(args[1], "index")?, b(args[2]))?;
            Ok(Reply::Ok)
        }
        "LTRIM" => {
            arity(args, 3, "LTRIM key start stop")?;
            db.ltrim(b(args[0]), parse(args[1], "start")?, parse(args[2], "stop")?)?;
            Ok(Reply::Ok)
        }

        // sets
        "SADD" => {
            at_least(args, 2, "SADD key member [member ...]")?;
            Ok(Reply::int(db.sadd(b(args[0]), &bytes(&args[1..]))?))
        }
        "SREM" => {
            at_least(args, 2, "SREM key member [member ...]")?;
            Ok(Reply::int(db.srem(b(args[0]), &bytes(&args[1..]))?))
        }
        "SCARD" => {
            arity(args, 1, "SCARD key")?;
            Ok(Reply::int(db.scard(b(args[0]))?))
        }
        "SISMEMBER" => {
            arity(args, 2, "SISMEMBER key member")?;
            Ok(Reply::flag(db.sismember(b(args[0]), b(args[1]))?))
        }
        "SMEMBERS" => {
            arity(args, 1, "SMEMBERS key")?;
            Ok(Reply::bulks(db.smembers(b(args[0]))?))
        }

        // sorted sets
        "ZADD" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                bail!("usage: ZADD key score member [score member ...]");
            }
            let entries = args[1..]
                .chunks_exact(2)
                .map(|pair| Ok((parse::<f64>(pair[0], "score")?, b(pair[1]))))
                .collect::<Result<Vec<_>>>()?;
            Ok(Reply::int(db.zadd(b(args[0]), &entries)?))
        }
        "ZINCRBY" => {
            arity(args, 3, "ZINCRBY key delta member")?;
            Ok(Reply::Float(db.zincr_by(
                b(args[0]),
                parse(args[1], "delta")?,
                b(args[2]),
            )?))
        }
        "ZREM" => {
            at_least(args, 2, "ZREM key member [member ...]")?;
            Ok(Reply::int(db.zrem(b(args[0]), &bytes(&args[1..]))?))
        }
        "ZSCORE" => {
            arity(args, 2, "ZSCORE key member")?;
            Ok(db
                .zscore(b(args[0]), b(args[1]))?
                .map(Reply::Float)
                .unwrap_or(Reply::Nil))
        }
        "ZCARD" => {
            arity(args, 1, "ZCARD key")?;
            Ok(Reply::int(db.zcard(b(args[0]))?))
        }
        "ZRANK" => {
            arity(args, 2, "ZRANK key member")?;
            Ok(db
                .zrank(b(args[0]), b(args[1]))?
                .map(Reply::int)
                .unwrap_or(Reply::Nil))
        }
        "ZRANGE" => {
            if args.len() != 3 && !(args.len() == 4 && args[3].eq_ignore_ascii_case("WITHSCORES")) {
                bail!("usage: ZRANGE key start stop [WITHSCORES]");
            }
            let members = db.zrange(b(args[0]), parse(args[1], "start")?, parse(args[2], "stop")?)?;
            Ok(scored(members, args.len() == 4))
        }
        "ZRANGEBYSCORE" => {
            arity(args, 3, "ZRANGEBYSCORE key min max")?;
            let members = db.zrange_by_score(b(args[0]), bound(args[1])?, bound(args[2])?)?;
            Ok(scored(members, true))
        }
        "ZCOUNT" => {
            arity(args, 3, "ZCOUNT key min max")?;
            Ok(Reply::int(db.zcount(b(args[0]), bound(args[1])?, bound(args[2])?)?))
        }

        // bitmaps
        "SETBIT" => {
            arity(args, 3, "SETBIT key offset 0|1")?;
            let on = match args[2] {
                "0" => false,
                "1" => true,
                other => bail!("bit must be 0 or 1, got {other:?}"),
            };
            Ok(Reply::flag(db.setbit(b(args[0]), parse(args[1], "offset")?, on)?))
        }
        "GETBIT" => {
            arity(args, 2, "GETBIT key offset")?;
            Ok(Reply::flag(db.getbit(b(args[0]), parse(args[1], "offset")?)?))
        }
        "BITCOUNT" => {
            arity(args, 1, "BITCOUNT key")?;
            Ok(Reply::int(db.bitcount(b(args[0]))?))
        }

        other => bail!("unknown command: {}", other.to_lowercase()),
    }
}

fn b(s: &str) -> &[u8] {
    s.as_bytes()
}

fn bytes<'a>(args: &[&'a str]) -> Vec<&'a [u8]> {
    args.iter().map(|s| s.as_bytes()).collect()
}

fn pairs<'a>(args: &[&'a str], usage: &str) -> Result<Vec<(&'a [u8], &'a [u8])>> {
    if args.is_empty() || args.len() % 2 != 0 {
        bail!("usage: {usage}");
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| (pair[0].as_bytes(), pair[1].as_bytes()))
        .collect())
}

fn scored(members: Vec<(Vec<u8>, f64)>, with_scores: bool) -> Reply {
    Reply::List(
        members
            .into_iter()
            .flat_map(|(member, score)| {
                let mut items = vec![Reply::Bulk(member)];
                if with_scores {
                    items.push(Reply::Float(score));
                }
                items
            })
            .collect(),
    )
}

fn arity(args: &[&str], n: usize, usage: &str) -> Result<()> {
    if args.len() != n {
        bail!("usage: {usage}");
    }
    Ok(())
}

fn at_least(args: &[&str], n: usize, usage: &str) -> Result<()> {
    if args.len() < n {
        bail!("usage: {usage}");
    }
    Ok(())
}

fn parse<T: FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse()
        .map_err(|_| anyhow!("{what} is not a valid number: {s:?}"))
}

/// `1.5` is inclusive, `(1.5` exclusive; `-inf` and `+inf` work.
fn bound(s: &str) -> Result<ScoreBound> {
    Ok(match s.strip_prefix('(') {
        Some(rest) => ScoreBound::Exclusive(parse(rest, "score bound")?),
        None => ScoreBound::Inclusive(parse(s, "score bound")?),
    })
}

/// Decimal or `0x` hex.
fn parse_prefix(s: &str) -> Result<u16> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| anyhow!("prefix must be a u16, got {s:?}"))
}
