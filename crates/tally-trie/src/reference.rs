// crates/tally-trie/src/reference.rs
//
// Reference backend: recomputes every node hash from the sorted leaf set on
// each insert. Slow but transparently correct: the root is, by
// construction, a pure function of the current key/value mapping, which is
// the invariant the incremental backend is checked against.

use std::collections::BTreeMap;

use primitive_types::U256;

use tally_core::{Digest, TallyError, ZERO_DIGEST};

use crate::backend::{KeyMode, TrieBackend};
use crate::proof::{leaf_hash, branch_hash, path_bit, set_mask_bit, Proof};

struct LeafRecord {
    leaf: Digest,
    value: Vec<u8>,
}

/// Pure recursive trie. Leaves live in a path-sorted map; node hashes are
/// derived on demand from slices of that map.
pub struct ReferenceTrie {
    mode: KeyMode,
    leaves: BTreeMap<Digest, LeafRecord>,
    root: Digest,
}

impl ReferenceTrie {
    pub fn new(mode: KeyMode) -> Self {
        Self {
            mode,
            leaves: BTreeMap::new(),
            root: ZERO_DIGEST,
        }
    }

    fn sorted_leaves(&self) -> Vec<(Digest, Digest)> {
        self.leaves
            .iter()
            .map(|(path, record)| (*path, record.leaf))
            .collect()
    }

    fn node_hash(leaves: &[(Digest, Digest)], depth: usize) -> Digest {
        match leaves.len() {
            0 => ZERO_DIGEST,
            1 => leaves[0].1,
            _ => {
                let split = leaves.partition_point(|(path, _)| path_bit(path, depth) == 0);
                let (left, right) = leaves.split_at(split);
                if left.is_empty() {
                    Self::node_hash(right, depth + 1)
                } else if right.is_empty() {
                    Self::node_hash(left, depth + 1)
                } else {
                    branch_hash(
                        &Self::node_hash(left, depth + 1),
                        &Self::node_hash(right, depth + 1),
                    )
                }
            }
        }
    }

    fn collect_proof(
        leaves: &[(Digest, Digest)],
        path: &Digest,
        depth: usize,
        mask: &mut U256,
        siblings: &mut Vec<Digest>,
    ) -> bool {
        match leaves.len() {
            0 => false,
            1 => leaves[0].0 == *path,
            _ => {
                let split = leaves.partition_point(|(p, _)| path_bit(p, depth) == 0);
                let (left, right) = leaves.split_at(split);
                let (mine, other) = if path_bit(path, depth) == 0 {
                    (left, right)
                } else {
                    (right, left)
                };
                if !other.is_empty() {
                    set_mask_bit(mask, depth);
                    siblings.push(Self::node_hash(other, depth + 1));
                }
                Self::collect_proof(mine, path, depth + 1, mask, siblings)
            }
        }
    }
}

impl TrieBackend for ReferenceTrie {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Digest, TallyError> {
        let path = self.mode.path(key)?;
        if value.is_empty() {
            return Err(TallyError::Malformed("empty trie value".to_string()));
        }
        self.leaves.insert(
            path,
            LeafRecord {
                leaf: leaf_hash(&path, value),
                value: value.to_vec(),
            },
        );
        let sorted = self.sorted_leaves();
        self.root = Self::node_hash(&sorted, 0);
        Ok(self.root)
    }

    fn root_hash(&self) -> Digest {
        self.root
    }

    fn proof(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Proof)>, TallyError> {
        let path = self.mode.path(key)?;
        let record = match self.leaves.get(&path) {
            Some(record) => record,
            None => return Ok(None),
        };
        let sorted = self.sorted_leaves();
        let mut mask = U256::zero();
        let mut siblings = Vec::new();
        let found = Self::collect_proof(&sorted, &path, 0, &mut mask, &mut siblings);
        debug_assert!(found);
        Ok(Some((
            record.value.clone(),
            Proof {
                branch_mask: mask,
                siblings,
            },
        )))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError> {
        let path = self.mode.path(key)?;
        Ok(self.leaves.get(&path).map(|record| record.value.clone()))
    }

    fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }
}
