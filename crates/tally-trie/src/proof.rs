// crates/tally-trie/src/proof.rs
//
// Proof material and the pure folding arithmetic shared by every backend.
//
// A trie places each leaf at the 256-bit path derived from its key. Only
// depths where both halves of the key space are populated produce a branch
// node; runs with a single populated side pass the child hash through
// unhashed. A proof therefore carries a 256-bit branch mask (bit d set, MSB
// first, iff depth d branched on the way to the leaf) and one sibling hash
// per set bit, listed top-down.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use tally_core::{hash_concat, Digest, TallyError};

const LEAF_TAG: [u8; 1] = [0x00];
const BRANCH_TAG: [u8; 1] = [0x01];

/// Bit of a 256-bit path at the given depth, MSB first. Depth 0 is the
/// first bit consumed walking down from the root.
pub fn path_bit(path: &Digest, depth: usize) -> u8 {
    (path[depth / 8] >> (7 - depth % 8)) & 1
}

/// Whether the branch mask records a branch at the given depth.
pub fn mask_bit(mask: &U256, depth: usize) -> bool {
    mask.bit(255 - depth)
}

/// Record a branch at the given depth in the mask.
pub fn set_mask_bit(mask: &mut U256, depth: usize) {
    *mask = *mask | (U256::one() << (255 - depth));
}

/// Hash of a leaf node. Binds the full path so a leaf cannot be replayed at
/// a different position.
pub fn leaf_hash(path: &Digest, value: &[u8]) -> Digest {
    hash_concat(&[&LEAF_TAG, path, value])
}

/// Hash of a branch node over its two child hashes.
pub fn branch_hash(left: &Digest, right: &Digest) -> Digest {
    hash_concat(&[&BRANCH_TAG, left, right])
}

/// Inclusion proof: branch mask plus off-path sibling hashes, top-down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub branch_mask: U256,
    pub siblings: Vec<Digest>,
}

impl Proof {
    pub fn empty() -> Self {
        Self {
            branch_mask: U256::zero(),
            siblings: Vec::new(),
        }
    }

    /// Depths recorded in the branch mask, ascending (top-down), parallel
    /// to `siblings`.
    pub fn branch_depths(&self) -> Vec<usize> {
        (0..256).filter(|d| mask_bit(&self.branch_mask, *d)).collect()
    }

    /// Drop the `k` leading siblings and the matching top bits of the mask.
    ///
    /// Folding the shrunk proof yields the on-path node hash `k` branching
    /// levels below the root, which is how the dispute engine walks the
    /// binary search down one level per round.
    pub fn drop_front(&self, k: usize) -> Proof {
        let depths = self.branch_depths();
        let mut mask = self.branch_mask;
        for depth in depths.iter().take(k) {
            mask = mask & !(U256::one() << (255 - depth));
        }
        Proof {
            branch_mask: mask,
            siblings: self.siblings.iter().skip(k).copied().collect(),
        }
    }
}

/// Fold a leaf hash up through a proof's siblings.
///
/// With the full proof this reproduces the root; with a front-shrunk proof
/// it reproduces the on-path node below the dropped levels. Pure function,
/// no trie access.
pub fn fold_from_leaf(path: &Digest, leaf: Digest, proof: &Proof) -> Result<Digest, TallyError> {
    let depths = proof.branch_depths();
    if depths.len() != proof.siblings.len() {
        return Err(TallyError::Malformed(format!(
            "branch mask records {} branches but proof carries {} siblings",
            depths.len(),
            proof.siblings.len()
        )));
    }
    let mut current = leaf;
    for (depth, sibling) in depths.iter().rev().zip(proof.siblings.iter().rev()) {
        current = if path_bit(path, *depth) == 0 {
            branch_hash(&current, sibling)
        } else {
            branch_hash(sibling, &current)
        };
    }
    Ok(current)
}

/// Root hash implied by (key path, value, proof). The verification side of
/// the trie contract: no trie access, bit-for-bit reproducible.
pub fn implied_root(path: &Digest, value: &[u8], proof: &Proof) -> Result<Digest, TallyError> {
    fold_from_leaf(path, leaf_hash(path, value), proof)
}
