// crates/tally-trie/src/lib.rs
//
// tally-trie: Authenticated binary trie for the Tally Protocol.
//
// A hash trie over 256-bit key paths with compact inclusion proofs
// (branch mask + sibling hashes), a pure implied-root verifier, two
// runtime-selectable backends with bit-identical output, and the sorted
// adjacency index used to stand in for non-existence proofs.

pub mod adjacency;
pub mod backend;
pub mod incremental;
pub mod proof;
pub mod reference;

pub use adjacency::AdjacencyIndex;
pub use backend::{BackendKind, KeyMode, TrieBackend};
pub use incremental::IncrementalTrie;
pub use proof::{
    branch_hash, fold_from_leaf, implied_root, leaf_hash, mask_bit, path_bit, set_mask_bit, Proof,
};
pub use reference::ReferenceTrie;
