//! # Store - collection types over the ordered engine
//!
//! Maps strings, hashes, lists, sets, sorted sets and bitmaps onto the flat
//! byte-keyed [`engine`], with every multi-key mutation committed as one
//! atomic batch.
//!
//! ## Layout
//!
//! Each logical key has one **metadata record** (type, version, expiry,
//! size) and, for collections, any number of **subkeys** tagged with the
//! record's version. A subkey is visible only while its version matches the
//! record, so deleting or replacing a collection of any size is one metadata
//! write. Stale subkeys are reclaimed by the [`collector`].
//!
//! ```text
//! Storage ── RwLock<Engine> ── commit(WriteBatch) ──> CommitObserver(s)
//!    │
//!    ├── NamespaceTable (token → 2-byte prefix)
//!    ├── VersionClock
//!    └── db(token) -> Database ── string / hash / list / set / zset / bitmap
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                               |
//! |---------------|-------------------------------------------------------|
//! | [`codec`]     | physical key layout, ranges, order-preserving scores  |
//! | [`namespace`] | namespace table and its persisted rows                |
//! | [`metadata`]  | metadata records, version clock, lazy expiry          |
//! | [`batch`]     | `WriteBatch`                                          |
//! | [`storage`]   | `Storage`: commit, observers, snapshots, stats        |
//! | [`db`]        | `Database` handle and generic key operations          |
//! | `types`       | per-type operations                                   |
//! | [`collector`] | orphan collector and its background thread            |

pub mod batch;
pub mod codec;
pub mod collector;
pub mod db;
pub mod error;
pub mod metadata;
pub mod namespace;
pub mod storage;
mod types;

pub use batch::WriteBatch;
pub use collector::{CollectorHandle, CollectorOptions, OrphanCollector, SweepStats, SweepStep};
pub use db::Database;
pub use engine::BatchOp;
pub use error::{StoreError, StoreResult};
pub use metadata::{now_ms, DataType, Metadata, VersionClock};
pub use namespace::{Namespace, NamespaceTable};
pub use storage::{CommitObserver, CommittedBatch, SnapshotChunk, Storage, StorageStats};
pub use types::{ScoreBound, FRAGMENT_BYTES};

#[cfg(test)]
mod tests;
