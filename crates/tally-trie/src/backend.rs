// crates/tally-trie/src/backend.rs
//
// The backend seam. Two independent implementations sit behind one trait
// and are runtime-selectable; callers must not depend on which is active,
// and roots/proofs are bit-identical across both.

use serde::{Deserialize, Serialize};

use tally_core::{hash_bytes, Digest, TallyError};

use crate::incremental::IncrementalTrie;
use crate::proof::Proof;
use crate::reference::ReferenceTrie;

/// How a key maps to its 256-bit trie path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMode {
    /// Path = SHA-256 of the key. Bounds depth and detaches trie shape from
    /// the key's natural ordering. Used by the reputation trie.
    Hashed,
    /// The 32 key bytes are the path. Keeps numeric key order equal to trie
    /// order, which the justification trie's binary search relies on.
    Raw,
}

impl KeyMode {
    pub fn path(&self, key: &[u8]) -> Result<Digest, TallyError> {
        if key.is_empty() {
            return Err(TallyError::Malformed("empty trie key".to_string()));
        }
        match self {
            KeyMode::Hashed => Ok(hash_bytes(key)),
            KeyMode::Raw => {
                let bytes: [u8; 32] = key.try_into().map_err(|_| {
                    TallyError::Malformed(format!(
                        "raw-mode trie key must be 32 bytes, got {}",
                        key.len()
                    ))
                })?;
                Ok(bytes)
            }
        }
    }
}

/// Which backend implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Pure recursive recomputation; the cross-validation reference.
    Reference,
    /// Crit-bit node tree with per-insert path rehashing.
    #[default]
    Incremental,
}

impl BackendKind {
    pub fn open(&self, mode: KeyMode) -> Box<dyn TrieBackend> {
        match self {
            BackendKind::Reference => Box::new(ReferenceTrie::new(mode)),
            BackendKind::Incremental => Box::new(IncrementalTrie::new(mode)),
        }
    }
}

/// An authenticated key/value trie.
///
/// `insert` overwrites on an existing key and recomputes the path to root;
/// there is no delete: a removed reputation is a zero value, never an
/// absent key. Absence is a typed `None` from the proof functions, not an
/// error: an empty trie and an unset key are not failure states.
pub trait TrieBackend: Send {
    /// Insert or overwrite. Returns the new root hash. Fatal only for
    /// malformed byte widths.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Digest, TallyError>;

    /// Current root digest; all-zero for an empty trie.
    fn root_hash(&self) -> Digest;

    /// Value and inclusion proof for a key, or `None` if not present.
    fn proof(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Proof)>, TallyError>;

    /// Value for a key, or `None` if not present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError>;

    /// Number of distinct keys ever inserted.
    fn leaf_count(&self) -> u64;
}
