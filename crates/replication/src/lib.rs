//! # Replication - logical stream of committed batches
//!
//! Turns every batch the store commits into a replication entry that
//! followers fetch by sequence number and replay locally.
//!
//! ```text
//! Storage::commit ──> ReplicationLog (bounded) ──> Journal (repl/seg-*.log)
//!                          │
//!                      Producer::handle <── Request ── SyncTransport <── Follower
//!                          │                                                │
//!                          └───── Response (Entries / UpToDate / ...) ──────┘
//! ```
//!
//! The producer keeps no cursor per follower: each fetch names its own
//! starting sequence, so a follower can reconnect, restart, or switch to
//! another producer holding the same log. A follower that fell behind the
//! retention floor receives `SequenceTooOld` and resyncs from a snapshot.
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | [`log`]       | retained entries, retention, fetch, long-poll       |
//! | [`journal`]   | segment files that keep the log across restarts     |
//! | [`protocol`]  | request/response messages and framing               |
//! | [`producer`]  | request handler, stream and TCP serving             |
//! | [`follower`]  | idempotent apply, resync, background loop           |
//! | [`transport`] | `SyncTransport`: framed stream and in-process       |

pub mod error;
pub mod follower;
pub mod journal;
pub mod log;
pub mod producer;
pub mod protocol;
pub mod transport;

pub use error::{ReplResult, ReplicationError};
pub use follower::{applied_sequence, Follower, FollowerHandle, Progress};
pub use journal::Journal;
pub use log::{FetchLimits, FetchResult, LogStatus, ReplicationEntry, ReplicationLog};
pub use producer::{ListenerHandle, Producer};
pub use protocol::{Request, Response};
pub use transport::{connect_tcp, InProcessTransport, StreamTransport, SyncTransport, TcpTransport};

#[cfg(test)]
mod tests;
