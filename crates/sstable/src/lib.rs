//! # SSTable - Sorted String Table
//!
//! Immutable on-disk tables for the Eddy storage engine.
//!
//! When the in-memory [`memtable::Memtable`] crosses its size threshold the
//! engine flushes it to disk as an SSTable. Tables are write-once, read-many:
//! they are only ever replaced wholesale by compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted records)                                 │
//! │   crc32 (u32) | key_len (u32) | key | seq (u64)               │
//! │   present (u8) | [val_len (u32) | val]                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (serialized BloomFilter)                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION                                                 │
//! │   key_len (u32) | key | data_offset (u64)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (last 36 bytes)                                        │
//! │   max_seq | entry_count | bloom_offset | index_offset (u64)   │
//! │   magic (u32) "EDY1"                                          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The per-record CRC covers everything
//! after itself and is checked on every read.
//!
//! Keys are compared as raw bytes. The store's key codec is built so that
//! this order groups each collection's members together, which is what makes
//! [`SSTableReader::keys_in_range`] useful.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{Footer, FOOTER_BYTES, SSTABLE_MAGIC};
pub use merge::MergeIterator;
pub use reader::SSTableReader;
pub use writer::SSTableWriter;

#[cfg(test)]
mod tests;
