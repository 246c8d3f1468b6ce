//! Namespace table: token → 2-byte key prefix.
//!
//! Built from configuration at startup and persisted under the system area
//! (`[0x0000]['N'][prefix u16 BE] → [retired u8][token]`). A prefix, once
//! given out, is never handed to another token, even after its namespace is
//! retired.

use byteorder::{BigEndian, ByteOrder};
use config::NamespaceDef;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::info;

use crate::batch::WriteBatch;
use crate::codec::{prefix_range, system_key, SYSTEM_PREFIX, SYS_NAMESPACE};
use crate::error::{StoreError, StoreResult};

/// A live namespace: its token and key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    token: String,
    prefix: u16,
}

impl Namespace {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn prefix(&self) -> u16 {
        self.prefix
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04x})", self.token, self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    token: String,
    retired: bool,
}

/// One persisted namespace row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRecord {
    pub prefix: u16,
    pub token: String,
    pub retired: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceTable {
    by_token: HashMap<String, u16>,
    by_prefix: BTreeMap<u16, Slot>,
}

impl NamespaceTable {
    /// Builds a table from configured definitions only.
    ///
    /// # Errors
    ///
    /// `Config` on a reserved prefix or conflicting definitions.
    pub fn from_defs(defs: &[NamespaceDef]) -> StoreResult<Self> {
        let mut table = Self::default();
        for def in defs {
            table.register(&def.token, def.prefix)?;
        }
        Ok(table)
    }

    /// Adds `token → prefix`. Returns `false` if the exact mapping already exists.
    ///
    /// # Errors
    ///
    /// `Config` when the prefix is reserved, the token already maps elsewhere,
    /// the prefix belongs to another token, or the token was retired.
    pub fn register(&mut self, token: &str, prefix: u16) -> StoreResult<bool> {
        if prefix == SYSTEM_PREFIX {
            return Err(StoreError::Config(format!(
                "namespace {:?}: prefix 0x0000 is reserved",
                token
            )));
        }
        if token.is_empty() {
            return Err(StoreError::Config("namespace token must not be empty".into()));
        }

        if let Some(&existing) = self.by_token.get(token) {
            if existing != prefix {
                return Err(StoreError::Config(format!(
                    "namespace {:?} is already mapped to prefix 0x{:04x}, not 0x{:04x}",
                    token, existing, prefix
                )));
            }
            if self.by_prefix.get(&prefix).map(|s| s.retired).unwrap_or(false) {
                return Err(StoreError::Config(format!(
                    "namespace {:?} was retired",
                    token
                )));
            }
            return Ok(false);
        }

        if let Some(slot) = self.by_prefix.get(&prefix) {
            return Err(StoreError::Config(format!(
                "prefix 0x{:04x} already belongs to namespace {:?}",
                prefix, slot.token
            )));
        }

        self.by_token.insert(token.to_string(), prefix);
        self.by_prefix.insert(
            prefix,
            Slot {
                token: token.to_string(),
                retired: false,
            },
        );
        Ok(true)
    }

    /// Loads persisted rows into an empty table.
    fn restore(&mut self, record: NamespaceRecord) -> StoreResult<()> {
        self.register(&record.token, record.prefix)?;
        if record.retired {
            if let Some(slot) = self.by_prefix.get_mut(&record.prefix) {
                slot.retired = true;
            }
        }
        Ok(())
    }

    /// Builds the table from persisted rows, then adds configured definitions.
    /// Returns the table and the rows that still need persisting.
    ///
    /// # Errors
    ///
    /// `Config` when a configured definition conflicts with a persisted one.
    pub fn merge(
        persisted: Vec<NamespaceRecord>,
        defs: &[NamespaceDef],
    ) -> StoreResult<(Self, Vec<NamespaceRecord>)> {
        let mut table = Self::default();
        for record in persisted {
            table.restore(record)?;
        }

        let mut added = Vec::new();
        for def in defs {
            if table.register(&def.token, def.prefix)? {
                info!(token = %def.token, prefix = def.prefix, "registered namespace");
                added.push(NamespaceRecord {
                    prefix: def.prefix,
                    token: def.token.clone(),
                    retired: false,
                });
            }
        }
        Ok((table, added))
    }

    /// Adds rows that arrived from elsewhere (a replication leader). Rows that
    /// conflict with what is already known are skipped and reported.
    pub fn absorb(&mut self, records: Vec<NamespaceRecord>) -> Vec<NamespaceRecord> {
        let mut rejected = Vec::new();
        for record in records {
            let known_retired = self
                .by_prefix
                .get(&record.prefix)
                .map(|s| s.token == record.token && s.retired)
                .unwrap_or(false);
            if known_retired {
                continue;
            }
            if self.restore(record.clone()).is_err() {
                rejected.push(record);
            }
        }
        rejected
    }

    /// Resolves a live namespace by token.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` for unknown and retired tokens.
    pub fn resolve(&self, token: &str) -> StoreResult<Namespace> {
        self.by_token
            .get(token)
            .and_then(|&prefix| self.by_prefix(prefix))
            .ok_or_else(|| StoreError::NamespaceNotFound(token.to_string()))
    }

    /// The live namespace owning `prefix`, if any.
    pub fn by_prefix(&self, prefix: u16) -> Option<Namespace> {
        self.by_prefix
            .get(&prefix)
            .filter(|slot| !slot.retired)
            .map(|slot| Namespace {
                token: slot.token.clone(),
                prefix,
            })
    }

    pub fn is_retired(&self, prefix: u16) -> bool {
        self.by_prefix.get(&prefix).map(|s| s.retired).unwrap_or(false)
    }

    /// Marks `token` retired and returns the row to persist.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the token is unknown or already retired.
    pub fn retire(&mut self, token: &str) -> StoreResult<NamespaceRecord> {
        let prefix = self.resolve(token)?.prefix;
        if let Some(slot) = self.by_prefix.get_mut(&prefix) {
            slot.retired = true;
        }
        Ok(NamespaceRecord {
            prefix,
            token: token.to_string(),
            retired: true,
        })
    }

    /// Live namespaces in prefix order.
    pub fn live(&self) -> Vec<Namespace> {
        self.by_prefix
            .iter()
            .filter(|(_, slot)| !slot.retired)
            .map(|(&prefix, slot)| Namespace {
                token: slot.token.clone(),
                prefix,
            })
            .collect()
    }

    /// Retired prefixes in order.
    pub fn retired(&self) -> Vec<u16> {
        self.by_prefix
            .iter()
            .filter(|(_, slot)| slot.retired)
            .map(|(&prefix, _)| prefix)
            .collect()
    }
}

/// `[start, end)` of the persisted namespace rows.
pub fn persisted_range() -> (Vec<u8>, Vec<u8>) {
    prefix_range(&system_key(SYS_NAMESPACE, b""))
}

pub fn is_namespace_key(key: &[u8]) -> bool {
    key.starts_with(&system_key(SYS_NAMESPACE, b""))
}

/// Enqueues `record` into `batch`.
pub fn persist(batch: &mut WriteBatch, record: &NamespaceRecord) {
    let key = system_key(SYS_NAMESPACE, &record.prefix.to_be_bytes());
    let mut value = Vec::with_capacity(1 + record.token.len());
    value.push(u8::from(record.retired));
    value.extend_from_slice(record.token.as_bytes());
    batch.put(key, value);
}

/// Parses one persisted row.
///
/// # Errors
///
/// `MalformedKey` when the row does not have the expected layout.
pub fn decode_record(key: &[u8], value: &[u8]) -> StoreResult<NamespaceRecord> {
    let head = system_key(SYS_NAMESPACE, b"");
    let rest = key
        .strip_prefix(head.as_slice())
        .filter(|rest| rest.len() == 2)
        .ok_or_else(|| StoreError::malformed("bad namespace row key"))?;
    let prefix = BigEndian::read_u16(rest);

    let (&flag, token) = value
        .split_first()
        .ok_or_else(|| StoreError::malformed("empty namespace row"))?;
    let token = String::from_utf8(token.to_vec())
        .map_err(|_| StoreError::malformed("namespace token is not UTF-8"))?;

    Ok(NamespaceRecord {
        prefix,
        token,
        retired: flag != 0,
    })
}
