// crates/tally-engine/src/justification.rs
//
// The justification trie: a second authenticated trie, keyed by sequential
// update index in raw mode so that index order equals trie order. Each
// value committed on-trie is the 64-byte snapshot (interim root, leaf
// count); the off-trie entry bundles the proof material needed to defend
// that update later. Built fresh on every replay pass, optionally persisted
// to a cache file, immutable once a pass completes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use tally_core::{Digest, ReputationKey, ReputationValue, TallyError};
use tally_trie::{BackendKind, KeyMode, Proof, TrieBackend};

/// Encoded width of a justification snapshot: two 32-byte words.
pub const ENCODED_SNAPSHOT_LEN: usize = 64;

/// Trie key for a justification index: a 32-byte big-endian word.
pub fn index_key(index: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&index.to_be_bytes());
    out
}

/// The on-trie value of one justification entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationSnapshot {
    /// Reputation-trie root immediately before the indexed update.
    pub interim_root: Digest,
    /// Reputation-trie leaf count at that same moment.
    pub leaf_count: u64,
}

impl JustificationSnapshot {
    /// interim root || leaf count as a 32-byte big-endian word.
    pub fn encode(&self) -> [u8; ENCODED_SNAPSHOT_LEN] {
        let mut out = [0u8; ENCODED_SNAPSHOT_LEN];
        out[..32].copy_from_slice(&self.interim_root);
        out[56..].copy_from_slice(&self.leaf_count.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TallyError> {
        if bytes.len() != ENCODED_SNAPSHOT_LEN {
            return Err(TallyError::Malformed(format!(
                "justification snapshot must be {} bytes, got {}",
                ENCODED_SNAPSHOT_LEN,
                bytes.len()
            )));
        }
        if bytes[32..56].iter().any(|b| *b != 0) {
            return Err(TallyError::Malformed(
                "leaf count word exceeds 64 bits".to_string(),
            ));
        }
        let mut root = [0u8; 32];
        root.copy_from_slice(&bytes[..32]);
        let mut count_word = [0u8; 8];
        count_word.copy_from_slice(&bytes[56..]);
        Ok(Self {
            interim_root: root,
            leaf_count: u64::from_be_bytes(count_word),
        })
    }
}

/// Proof of one consulted key against the interim state of an update.
///
/// When `adjacent_for` is set, the proven key stands in for the absence of
/// that other key: the nearest existing neighbor substitutes for a
/// non-existence proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyProofMaterial {
    pub key: ReputationKey,
    pub value: ReputationValue,
    pub proof: Proof,
    pub adjacent_for: Option<ReputationKey>,
}

impl KeyProofMaterial {
    pub fn is_adjacency_substitute(&self) -> bool {
        self.adjacent_for.is_some()
    }
}

/// Everything recorded about one applied update, captured against the
/// state immediately before its insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// The key the update wrote.
    pub key: ReputationKey,
    /// Value before the insert; `None` when the key did not exist yet.
    pub value_before: Option<ReputationValue>,
    /// Value written by the insert.
    pub value_after: ReputationValue,
    /// The signed delta that was applied.
    pub delta: i128,
    /// Proof for the updated key (inclusion, or the adjacency substitute
    /// when the key was absent).
    pub key_proof: Option<KeyProofMaterial>,
    /// Proof for the origin-skill value, when one was consulted for
    /// proportional propagation.
    pub origin_proof: Option<KeyProofMaterial>,
    /// Proof for the child value, when a child-skill update consulted one.
    pub child_proof: Option<KeyProofMaterial>,
}

/// One justification entry: the snapshot committed on-trie plus the update
/// record. The final entry of a pass (index = total updates) carries no
/// update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JustificationEntry {
    pub index: u64,
    pub snapshot: JustificationSnapshot,
    pub update: Option<UpdateRecord>,
}

/// The justification trie for one replay pass.
pub struct JustificationTrie {
    trie: Box<dyn TrieBackend>,
    entries: Vec<JustificationEntry>,
}

impl JustificationTrie {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            trie: backend.open(KeyMode::Raw),
            entries: Vec::new(),
        }
    }

    /// Append the next entry. Indices are dense and strictly sequential; a
    /// completed pass holds exactly total_updates + 1 entries.
    pub fn append(&mut self, entry: JustificationEntry) -> Result<Digest, TallyError> {
        if entry.index != self.entries.len() as u64 {
            return Err(TallyError::InvalidState(format!(
                "justification entries are sequential: expected index {}, got {}",
                self.entries.len(),
                entry.index
            )));
        }
        let root = self
            .trie
            .insert(&index_key(entry.index), &entry.snapshot.encode())?;
        self.entries.push(entry);
        Ok(root)
    }

    pub fn root_hash(&self) -> Digest {
        self.trie.root_hash()
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[JustificationEntry] {
        &self.entries
    }

    pub fn entry(&self, index: u64) -> Result<&JustificationEntry, TallyError> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| TallyError::NotFound(format!("justification entry {}", index)))
    }

    /// Snapshot and trie proof for one index.
    pub fn entry_proof(&self, index: u64) -> Result<(JustificationSnapshot, Proof), TallyError> {
        let (bytes, proof) = self
            .trie
            .proof(&index_key(index))?
            .ok_or_else(|| TallyError::NotFound(format!("justification entry {}", index)))?;
        Ok((JustificationSnapshot::decode(&bytes)?, proof))
    }

    /// Write all entries to a JSON cache file. The trie itself is not
    /// persisted; `load` rebuilds it by re-appending.
    pub fn persist(&self, path: &Path) -> Result<(), TallyError> {
        let json = serde_json::to_vec(&self.entries)?;
        fs::write(path, json)
            .map_err(|e| TallyError::Storage(format!("writing justification cache: {}", e)))
    }

    /// Rebuild a pass's justification trie from a cache file.
    pub fn load(backend: BackendKind, path: &Path) -> Result<Self, TallyError> {
        let bytes = fs::read(path)
            .map_err(|e| TallyError::Storage(format!("reading justification cache: {}", e)))?;
        let entries: Vec<JustificationEntry> = serde_json::from_slice(&bytes)?;
        let mut rebuilt = Self::new(backend);
        for entry in entries {
            rebuilt.append(entry)?;
        }
        Ok(rebuilt)
    }
}
