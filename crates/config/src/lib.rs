//! # Config - Eddy startup configuration
//!
//! One immutable [`Config`] is built at startup and handed to every
//! component at construction. Nothing reads the environment after that.
//!
//! Two ways to build it:
//!
//! - [`Config::from_env`] reads `EDDY_*` variables, falling back to defaults.
//! - [`Config::builder`] for tests and embedding.
//!
//! ```text
//! EDDY_DATA_DIR            data directory                 (default: "data")
//! EDDY_FLUSH_KB            memtable flush threshold, KiB  (default: 1024)
//! EDDY_WAL_SYNC            fsync every WAL append         (default: true)
//! EDDY_L0_TRIGGER          L0 compaction trigger, 0 = off (default: 4)
//! EDDY_NAMESPACES          token=prefix,...               (default: "default=1")
//! EDDY_REPL_MAX_ENTRIES    retained replication entries   (default: 100000)
//! EDDY_REPL_MAX_MB         retained replication bytes     (default: 64)
//! EDDY_REPL_MAX_AGE_SECS   retained replication age       (default: 3600)
//! EDDY_REPL_FETCH_BATCH    max entries per fetch          (default: 512)
//! EDDY_SWEEP_SECS          orphan sweep interval, 0 = off (default: 60)
//! EDDY_ACTIVE_EXPIRY       sweep also purges expired keys (default: true)
//! EDDY_REPL_LISTEN         serve replication on this addr (default: unset)
//! EDDY_REPL_UPSTREAM       follow this producer           (default: unset)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024 * 1024;
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;
pub const DEFAULT_FETCH_BATCH: usize = 512;

/// Errors raised while building a [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    #[error("invalid namespace definition {0:?} (expected token=prefix)")]
    InvalidNamespace(String),
}

/// One namespace definition: a token and its fixed 2-byte key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDef {
    pub token: String,
    pub prefix: u16,
}

impl NamespaceDef {
    pub fn new(token: impl Into<String>, prefix: u16) -> Self {
        Self {
            token: token.into(),
            prefix,
        }
    }
}

/// How much of the replication log the producer keeps in memory.
///
/// An entry is pruned as soon as any one limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_bytes: 64 * 1024 * 1024,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Main configuration for an Eddy instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all data files:
    ///
    /// ```text
    /// {data_dir}/
    ///   ├── wal.log
    ///   └── sst/        (SSTables + MANIFEST)
    /// ```
    pub data_dir: PathBuf,
    /// Memtable byte size that triggers a flush.
    pub flush_threshold: usize,
    pub wal_sync: bool,
    /// L0 table count that triggers compaction. `0` disables it.
    pub l0_compaction_trigger: usize,
    pub namespaces: Vec<NamespaceDef>,
    pub retention: RetentionPolicy,
    /// Upper bound on entries returned by one replication fetch.
    pub fetch_batch: usize,
    /// Interval between background orphan sweeps. `None` disables the sweeper.
    pub sweep_interval: Option<Duration>,
    /// When set, sweeps also delete metadata of expired keys.
    pub active_expiry: bool,
    pub repl_listen: Option<String>,
    pub repl_upstream: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            wal_sync: true,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            namespaces: vec![NamespaceDef::new("default", 1)],
            retention: RetentionPolicy::default(),
            fetch_batch: DEFAULT_FETCH_BATCH,
            sweep_interval: Some(Duration::from_secs(60)),
            active_expiry: true,
            repl_listen: None,
            repl_upstream: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reads `EDDY_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Unset variables
    /// keep their defaults; malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(dir) = lookup("EDDY_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(kb) = parse_var::<usize, _>(&lookup, "EDDY_FLUSH_KB")? {
            cfg.flush_threshold = kb * 1024;
        }
        if let Some(sync) = parse_var(&lookup, "EDDY_WAL_SYNC")? {
            cfg.wal_sync = sync;
        }
        if let Some(trigger) = parse_var(&lookup, "EDDY_L0_TRIGGER")? {
            cfg.l0_compaction_trigger = trigger;
        }
        if let Some(raw) = lookup("EDDY_NAMESPACES") {
            cfg.namespaces = parse_namespaces(&raw)?;
        }
        if let Some(n) = parse_var(&lookup, "EDDY_REPL_MAX_ENTRIES")? {
            cfg.retention.max_entries = n;
        }
        if let Some(mb) = parse_var::<usize, _>(&lookup, "EDDY_REPL_MAX_MB")? {
            cfg.retention.max_bytes = mb * 1024 * 1024;
        }
        if let Some(secs) = parse_var(&lookup, "EDDY_REPL_MAX_AGE_SECS")? {
            cfg.retention.max_age = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "EDDY_REPL_FETCH_BATCH")? {
            if n == 0 {
                return Err(invalid("EDDY_REPL_FETCH_BATCH", "0"));
            }
            cfg.fetch_batch = n;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "EDDY_SWEEP_SECS")? {
            cfg.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(active) = parse_var(&lookup, "EDDY_ACTIVE_EXPIRY")? {
            cfg.active_expiry = active;
        }
        cfg.repl_listen = lookup("EDDY_REPL_LISTEN").filter(|s| !s.is_empty());
        cfg.repl_upstream = lookup("EDDY_REPL_UPSTREAM").filter(|s| !s.is_empty());

        Ok(cfg)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("wal.log")
    }

    pub fn sst_dir(&self) -> PathBuf {
        self.data_dir.join("sst")
    }

    /// Segments of the producer's replication journal.
    pub fn repl_dir(&self) -> PathBuf {
        self.data_dir.join("repl")
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(var, &raw)),
    }
}

/// Parses `token=prefix[,token=prefix...]`. Prefixes are decimal or `0x` hex.
///
/// Only syntax is checked here; uniqueness and reserved prefixes are the
/// namespace table's job.
pub fn parse_namespaces(raw: &str) -> Result<Vec<NamespaceDef>, ConfigError> {
    let mut defs = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (token, prefix) = part
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidNamespace(part.to_string()))?;
        let token = token.trim();
        let prefix = prefix.trim();
        if token.is_empty() {
            return Err(ConfigError::InvalidNamespace(part.to_string()));
        }
        let parsed = match prefix.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => prefix.parse::<u16>(),
        }
        .map_err(|_| ConfigError::InvalidNamespace(part.to_string()))?;
        defs.push(NamespaceDef::new(token, parsed));
    }
    Ok(defs)
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.config.flush_threshold = bytes;
        self
    }

    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.config.wal_sync = sync;
        self
    }

    pub fn l0_compaction_trigger(mut self, trigger: usize) -> Self {
        self.config.l0_compaction_trigger = trigger;
        self
    }

    /// Replaces the namespace list.
    pub fn namespaces(mut self, defs: Vec<NamespaceDef>) -> Self {
        self.config.namespaces = defs;
        self
    }

    /// Adds one namespace to the list.
    pub fn namespace(mut self, token: impl Into<String>, prefix: u16) -> Self {
        self.config.namespaces.push(NamespaceDef::new(token, prefix));
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.config.retention = policy;
        self
    }

    pub fn fetch_batch(mut self, max_entries: usize) -> Self {
        self.config.fetch_batch = max_entries.max(1);
        self
    }

    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn active_expiry(mut self, enabled: bool) -> Self {
        self.config.active_expiry = enabled;
        self
    }

    pub fn repl_listen(mut self, addr: impl Into<String>) -> Self {
        self.config.repl_listen = Some(addr.into());
        self
    }

    pub fn repl_upstream(mut self, addr: impl Into<String>) -> Self {
        self.config.repl_upstream = Some(addr.into());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
