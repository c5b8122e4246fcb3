// crates/tally-trie/src/incremental.rs
//
// Incremental backend: a crit-bit node tree that rehashes only the path
// touched by an insert. Produces bit-identical roots and proofs to the
// reference backend.

use primitive_types::U256;

use tally_core::{Digest, TallyError, ZERO_DIGEST};

use crate::backend::{KeyMode, TrieBackend};
use crate::proof::{branch_hash, leaf_hash, path_bit, set_mask_bit, Proof};

enum Node {
    Leaf {
        path: Digest,
        leaf: Digest,
        value: Vec<u8>,
    },
    Branch {
        // Depth of the first bit at which the two subtrees diverge. Both
        // children are non-empty; single-sided runs are never materialized.
        depth: u16,
        hash: Digest,
        left: Box<Node>,
        right: Box<Node>,
    },
}

fn node_digest(node: &Node) -> Digest {
    match node {
        Node::Leaf { leaf, .. } => *leaf,
        Node::Branch { hash, .. } => *hash,
    }
}

fn make_branch(depth: u16, left: Box<Node>, right: Box<Node>) -> Box<Node> {
    let hash = branch_hash(&node_digest(&left), &node_digest(&right));
    Box::new(Node::Branch {
        depth,
        hash,
        left,
        right,
    })
}

/// First bit index at which two paths differ. Caller guarantees they do.
fn divergence_depth(a: &Digest, b: &Digest) -> u16 {
    for i in 0..32 {
        let xor = a[i] ^ b[i];
        if xor != 0 {
            return (i * 8) as u16 + xor.leading_zeros() as u16;
        }
    }
    unreachable!("divergence_depth called with equal paths")
}

/// Crit-bit trie with per-insert path rehashing.
pub struct IncrementalTrie {
    mode: KeyMode,
    root: Option<Box<Node>>,
    count: u64,
}

impl IncrementalTrie {
    pub fn new(mode: KeyMode) -> Self {
        Self {
            mode,
            root: None,
            count: 0,
        }
    }

    /// Path of the leaf reached by steering with `path`'s bits at each
    /// branch. For an absent key this is its nearest structural neighbor,
    /// which shares every prefix bit above the divergence point.
    fn steer_to_leaf<'a>(mut node: &'a Node, path: &Digest) -> &'a Digest {
        loop {
            match node {
                Node::Leaf { path: leaf_path, .. } => return leaf_path,
                Node::Branch {
                    depth, left, right, ..
                } => {
                    node = if path_bit(path, *depth as usize) == 0 {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn replace_leaf(node: Box<Node>, path: &Digest, leaf: Digest, value: Vec<u8>) -> Box<Node> {
        match *node {
            Node::Leaf { .. } => Box::new(Node::Leaf {
                path: *path,
                leaf,
                value,
            }),
            Node::Branch {
                depth, left, right, ..
            } => {
                if path_bit(path, depth as usize) == 0 {
                    let left = Self::replace_leaf(left, path, leaf, value);
                    make_branch(depth, left, right)
                } else {
                    let right = Self::replace_leaf(right, path, leaf, value);
                    make_branch(depth, left, right)
                }
            }
        }
    }

    fn place(
        node: Box<Node>,
        dv: u16,
        path: Digest,
        leaf: Digest,
        value: Vec<u8>,
    ) -> Box<Node> {
        match *node {
            Node::Branch {
                depth, left, right, ..
            } if depth < dv => {
                if path_bit(&path, depth as usize) == 0 {
                    let left = Self::place(left, dv, path, leaf, value);
                    make_branch(depth, left, right)
                } else {
                    let right = Self::place(right, dv, path, leaf, value);
                    make_branch(depth, left, right)
                }
            }
            existing => {
                let new_leaf = Box::new(Node::Leaf { path, leaf, value });
                let existing = Box::new(existing);
                if path_bit(&path, dv as usize) == 0 {
                    make_branch(dv, new_leaf, existing)
                } else {
                    make_branch(dv, existing, new_leaf)
                }
            }
        }
    }
}

impl TrieBackend for IncrementalTrie {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Digest, TallyError> {
        let path = self.mode.path(key)?;
        if value.is_empty() {
            return Err(TallyError::Malformed("empty trie value".to_string()));
        }
        let leaf = leaf_hash(&path, value);
        self.root = Some(match self.root.take() {
            None => {
                self.count = 1;
                Box::new(Node::Leaf {
                    path,
                    leaf,
                    value: value.to_vec(),
                })
            }
            Some(node) => {
                let nearest = *Self::steer_to_leaf(&node, &path);
                if nearest == path {
                    Self::replace_leaf(node, &path, leaf, value.to_vec())
                } else {
                    self.count += 1;
                    let dv = divergence_depth(&nearest, &path);
                    Self::place(node, dv, path, leaf, value.to_vec())
                }
            }
        });
        Ok(self.root_hash())
    }

    fn root_hash(&self) -> Digest {
        match &self.root {
            None => ZERO_DIGEST,
            Some(node) => node_digest(node),
        }
    }

    fn proof(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Proof)>, TallyError> {
        let path = self.mode.path(key)?;
        let mut node = match &self.root {
            None => return Ok(None),
            Some(node) => node.as_ref(),
        };
        let mut mask = U256::zero();
        let mut siblings = Vec::new();
        loop {
            match node {
                Node::Leaf {
                    path: leaf_path,
                    value,
                    ..
                } => {
                    if *leaf_path != path {
                        return Ok(None);
                    }
                    return Ok(Some((
                        value.clone(),
                        Proof {
                            branch_mask: mask,
                            siblings,
                        },
                    )));
                }
                Node::Branch {
                    depth, left, right, ..
                } => {
                    set_mask_bit(&mut mask, *depth as usize);
                    if path_bit(&path, *depth as usize) == 0 {
                        siblings.push(node_digest(right));
                        node = left;
                    } else {
                        siblings.push(node_digest(left));
                        node = right;
                    }
                }
            }
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError> {
        let path = self.mode.path(key)?;
        let mut node = match &self.root {
            None => return Ok(None),
            Some(node) => node.as_ref(),
        };
        loop {
            match node {
                Node::Leaf {
                    path: leaf_path,
                    value,
                    ..
                } => {
                    return Ok(if *leaf_path == path {
                        Some(value.clone())
                    } else {
                        None
                    });
                }
                Node::Branch {
                    depth, left, right, ..
                } => {
                    node = if path_bit(&path, *depth as usize) == 0 {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn leaf_count(&self) -> u64 {
        self.count
    }
}
