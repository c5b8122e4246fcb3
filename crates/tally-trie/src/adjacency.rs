// crates/tally-trie/src/adjacency.rs
//
// Nearest-key lookup over the digests of all known keys.
//
// An absent key has no inclusion proof. The dispute protocol instead
// accepts a proof that some *existing* key is the nearest neighbor of the
// absent key's digest: "this adjacent key exists and nothing sits closer"
// is the accepted evidence of absence.

use std::collections::BTreeMap;

use primitive_types::U256;

use tally_core::{Digest, ReputationKey};

/// Sorted index of known-key digests for O(log n) nearest lookup.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyIndex {
    by_digest: BTreeMap<Digest, ReputationKey>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &ReputationKey) {
        self.by_digest.insert(key.digest(), *key);
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    /// The existing key whose digest is numerically closest to `query`
    /// by unsigned big-integer distance. Only the two candidates adjacent
    /// in sort order are ever compared; an exact distance tie resolves to
    /// the lower digest. Returns the key's digest alongside the key.
    pub fn nearest(&self, query: &Digest) -> Option<(ReputationKey, Digest)> {
        let below = self.by_digest.range(..=*query).next_back();
        let above = self.by_digest.range(*query..).next();
        let q = U256::from_big_endian(query);
        match (below, above) {
            (None, None) => None,
            (Some((d, k)), None) => Some((*k, *d)),
            (None, Some((d, k))) => Some((*k, *d)),
            (Some((bd, bk)), Some((ad, ak))) => {
                let dist_below = q - U256::from_big_endian(bd);
                let dist_above = U256::from_big_endian(ad) - q;
                if dist_below <= dist_above {
                    Some((*bk, *bd))
                } else {
                    Some((*ak, *ad))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Address;

    fn key(skill: u64) -> ReputationKey {
        ReputationKey::new(Address([1u8; 20]), skill, Address([2u8; 20]))
    }

    #[test]
    fn empty_index_has_no_neighbor() {
        let index = AdjacencyIndex::new();
        assert!(index.nearest(&[0u8; 32]).is_none());
    }

    #[test]
    fn nearest_picks_closest_digest() {
        let mut index = AdjacencyIndex::new();
        let keys: Vec<ReputationKey> = (0..32).map(key).collect();
        for k in &keys {
            index.insert(k);
        }
        // Brute-force check against linear scan for a set of probes.
        for probe_skill in [100u64, 200, 3000, 40_000] {
            let probe = key(probe_skill).digest();
            let (found, found_digest) = index.nearest(&probe).unwrap();
            let q = U256::from_big_endian(&probe);
            let best = keys
                .iter()
                .min_by_key(|k| {
                    let d = U256::from_big_endian(&k.digest());
                    if d > q {
                        d - q
                    } else {
                        q - d
                    }
                })
                .unwrap();
            assert_eq!(found.digest(), found_digest);
            // Distances must match even if two keys are equidistant.
            let best_dist = {
                let d = U256::from_big_endian(&best.digest());
                if d > q {
                    d - q
                } else {
                    q - d
                }
            };
            let found_dist = {
                let d = U256::from_big_endian(&found_digest);
                if d > q {
                    d - q
                } else {
                    q - d
                }
            };
            assert_eq!(best_dist, found_dist);
        }
    }

    #[test]
    fn exact_hit_returns_the_key_itself() {
        let mut index = AdjacencyIndex::new();
        let k = key(9);
        index.insert(&k);
        let (found, digest) = index.nearest(&k.digest()).unwrap();
        assert_eq!(found, k);
        assert_eq!(digest, k.digest());
    }
}
