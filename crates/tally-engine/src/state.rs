// crates/tally-engine/src/state.rs
//
// One full reputation mapping at one point in a replay, backed by exactly
// one authenticated trie. Owns the uid counter and the key-insertion-order
// list that decay iteration depends on; no process-wide globals.

use std::collections::HashMap;

use tally_core::{Digest, ReputationKey, ReputationValue, TallyError, MAX_AMOUNT};
use tally_trie::{AdjacencyIndex, BackendKind, KeyMode, Proof, TrieBackend};

/// A reputation state, identified externally by (root hash, leaf count).
///
/// Two live states are retained during normal operation ("current" and
/// "previous") because disputes may reference either. Mutation is strictly
/// sequential: each insert depends on the root left by the previous one.
pub struct ReputationState {
    backend: BackendKind,
    trie: Box<dyn TrieBackend>,
    values: HashMap<ReputationKey, ReputationValue>,
    /// Keys in first-insertion order; position i holds the key with uid i+1.
    order: Vec<ReputationKey>,
    adjacency: AdjacencyIndex,
    next_uid: u64,
}

impl ReputationState {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            trie: backend.open(KeyMode::Hashed),
            values: HashMap::new(),
            order: Vec::new(),
            adjacency: AdjacencyIndex::new(),
            next_uid: 1,
        }
    }

    /// Rebuild a state from stored leaves. Leaves are inserted in uid order
    /// so the insertion-order list is reproduced exactly; uids must be the
    /// permutation 1..=n.
    pub fn from_leaves(
        backend: BackendKind,
        mut leaves: Vec<(ReputationKey, ReputationValue)>,
    ) -> Result<Self, TallyError> {
        leaves.sort_by_key(|(_, value)| value.uid);
        let mut state = Self::new(backend);
        for (position, (key, value)) in leaves.into_iter().enumerate() {
            if value.uid != position as u64 + 1 {
                return Err(TallyError::Consistency(format!(
                    "leaf uids are not the permutation 1..=n: expected {} at position {}, got {}",
                    position + 1,
                    position,
                    value.uid
                )));
            }
            state.insert_value(&key, value)?;
        }
        Ok(state)
    }

    /// Copy this state into a fresh trie instance. The fork replays every
    /// leaf in insertion order, so roots, uids, and ordering all carry over.
    pub fn fork(&self) -> Result<Self, TallyError> {
        let leaves = self.leaves_in_order();
        Self::from_leaves(self.backend, leaves)
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn root_hash(&self) -> Digest {
        self.trie.root_hash()
    }

    pub fn leaf_count(&self) -> u64 {
        self.order.len() as u64
    }

    pub fn get(&self, key: &ReputationKey) -> Option<ReputationValue> {
        self.values.get(key).copied()
    }

    /// The key decayed by update number `index` during the next replay pass
    /// (iteration order is preserved first-insertion order).
    pub fn key_at(&self, index: u64) -> Option<&ReputationKey> {
        self.order.get(index as usize)
    }

    /// Every leaf in first-insertion (uid) order.
    pub fn leaves_in_order(&self) -> Vec<(ReputationKey, ReputationValue)> {
        self.order
            .iter()
            .map(|key| (*key, self.values[key]))
            .collect()
    }

    /// Value and inclusion proof for a key, or `None` when absent.
    pub fn key_proof(
        &self,
        key: &ReputationKey,
    ) -> Result<Option<(ReputationValue, Proof)>, TallyError> {
        match self.trie.proof(&key.encode())? {
            None => Ok(None),
            Some((bytes, proof)) => {
                let value = ReputationValue::decode(&bytes)?;
                Ok(Some((value, proof)))
            }
        }
    }

    /// The nearest existing key (by digest distance) to an absent key,
    /// with its value and inclusion proof. `None` only while the state is
    /// empty.
    pub fn adjacent_of(
        &self,
        key: &ReputationKey,
    ) -> Result<Option<(ReputationKey, ReputationValue, Proof)>, TallyError> {
        let (neighbor, _digest) = match self.adjacency.nearest(&key.digest()) {
            None => return Ok(None),
            Some(found) => found,
        };
        let (value, proof) = self.key_proof(&neighbor)?.ok_or_else(|| {
            TallyError::Consistency(format!(
                "adjacency index lists {} but the trie has no proof for it",
                neighbor
            ))
        })?;
        Ok(Some((neighbor, value, proof)))
    }

    /// Set a key's amount. Assigns the next uid on first insertion; an
    /// existing key keeps its uid forever. Returns the stored value and the
    /// new root. The single-key insert is the atomic unit: all validation
    /// happens before the trie is touched.
    pub fn set_amount(
        &mut self,
        key: &ReputationKey,
        amount: u128,
    ) -> Result<(ReputationValue, Digest), TallyError> {
        if amount > MAX_AMOUNT {
            return Err(TallyError::Malformed(format!(
                "amount {} exceeds cap 2^127 - 1",
                amount
            )));
        }
        let value = match self.values.get(key) {
            Some(existing) => ReputationValue::new(amount, existing.uid),
            None => ReputationValue::new(amount, self.next_uid),
        };
        let root = self.insert_value(key, value)?;
        Ok((value, root))
    }

    fn insert_value(
        &mut self,
        key: &ReputationKey,
        value: ReputationValue,
    ) -> Result<Digest, TallyError> {
        let encoded_value = value.encode();
        let root = self.trie.insert(&key.encode(), &encoded_value)?;
        if self.values.insert(*key, value).is_none() {
            self.order.push(*key);
            self.adjacency.insert(key);
            self.next_uid = self.next_uid.max(value.uid + 1);
        }
        Ok(root)
    }
}
