// crates/tally-store/src/lib.rs
//
// tally-store: durable snapshot storage for the Tally Protocol.
//
// Persists accepted reputation states as (root, leaf count) indexed rows in
// RocksDB and serves historical proofs by rebuilding a state's trie from
// its stored leaves.

pub mod rocks;

pub use rocks::{RocksSnapshotStore, SnapshotMeta};
