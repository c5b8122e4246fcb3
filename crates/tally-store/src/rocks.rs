// crates/tally-store/src/rocks.rs
//
// RocksDB-backed persistent storage for accepted reputation states.
//
// Key format:
//   - Meta:  `state:{root_hex}:{leaf_count}` -> JSON-serialized metadata
//   - Leaf:  `leaf:{root_hex}:{key_hex}`     -> 64-byte encoded value
//
// The leaf rows allow point lookup by (root, key) and range lookup by root
// via prefix iteration, so historical proofs can be served for states that
// are no longer held in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{DBWithThreadMode, MultiThreaded, Options};
use serde::{Deserialize, Serialize};

use tally_core::{
    Digest, ReputationKey, ReputationValue, SnapshotStore, TallyError,
};
use tally_trie::{BackendKind, KeyMode, Proof};

/// Metadata row stored per snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub root: Digest,
    pub leaf_count: u64,
    pub created_at: DateTime<Utc>,
}

/// RocksDB wrapper implementing the `SnapshotStore` trait.
pub struct RocksSnapshotStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksSnapshotStore {
    /// Open a RocksDB database at the given filesystem path.
    ///
    /// Creates the database directory if it does not exist.
    pub fn open(path: &str) -> Result<Self, TallyError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)
            .map_err(|e| TallyError::Storage(format!("Failed to open RocksDB at {}: {}", path, e)))?;

        Ok(Self { db })
    }

    /// Build the metadata key: `state:{root_hex}:{leaf_count}`.
    fn state_key(root: &Digest, leaf_count: u64) -> Vec<u8> {
        format!("state:{}:{}", hex::encode(root), leaf_count).into_bytes()
    }

    /// Build the leaf key: `leaf:{root_hex}:{key_hex}`.
    fn leaf_key(root: &Digest, key: &ReputationKey) -> Vec<u8> {
        format!("leaf:{}:{}", hex::encode(root), hex::encode(key.encode())).into_bytes()
    }

    fn leaf_prefix(root: &Digest) -> String {
        format!("leaf:{}:", hex::encode(root))
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), TallyError> {
        self.db
            .put(key, value)
            .map_err(|e| TallyError::Storage(format!("RocksDB put failed: {}", e)))
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError> {
        self.db
            .get(key)
            .map_err(|e| TallyError::Storage(format!("RocksDB get failed: {}", e)))
    }

    /// Whether any snapshot metadata exists for a root, regardless of its
    /// leaf count.
    fn has_root(&self, root: &Digest) -> Result<bool, TallyError> {
        let prefix_str = format!("state:{}:", hex::encode(root));
        let prefix = prefix_str.as_bytes();
        let mut iter = self.db.prefix_iterator(prefix);
        match iter.next() {
            None => Ok(false),
            Some(item) => {
                let (key, _value) =
                    item.map_err(|e| TallyError::Storage(format!("RocksDB iteration error: {}", e)))?;
                Ok(key.starts_with(prefix))
            }
        }
    }

    /// Serve a proof for a key in a stored historical state by rebuilding
    /// that state's trie from its leaf rows. An unknown root is a typed
    /// not-found; a key absent from a known state is `None`.
    pub async fn historical_proof(
        &self,
        backend: BackendKind,
        root: Digest,
        key: &ReputationKey,
    ) -> Result<Option<(ReputationValue, Proof)>, TallyError> {
        let leaves = self.load_state(root).await?.ok_or_else(|| {
            TallyError::NotFound(format!("no stored state with root {}", hex::encode(root)))
        })?;
        let mut trie = backend.open(KeyMode::Hashed);
        for (leaf_key, leaf_value) in &leaves {
            trie.insert(&leaf_key.encode(), &leaf_value.encode())?;
        }
        if trie.root_hash() != root {
            return Err(TallyError::Consistency(format!(
                "stored leaves for {} rebuild to a different root",
                hex::encode(root)
            )));
        }
        match trie.proof(&key.encode())? {
            None => Ok(None),
            Some((bytes, proof)) => Ok(Some((ReputationValue::decode(&bytes)?, proof))),
        }
    }
}

#[async_trait]
impl SnapshotStore for RocksSnapshotStore {
    async fn save_state(
        &self,
        root: Digest,
        leaf_count: u64,
        leaves: &[(ReputationKey, ReputationValue)],
    ) -> Result<(), TallyError> {
        let meta = SnapshotMeta {
            root,
            leaf_count,
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec(&meta)?;
        self.put_raw(&Self::state_key(&root, leaf_count), &json)?;
        for (key, value) in leaves {
            self.put_raw(&Self::leaf_key(&root, key), &value.encode())?;
        }
        Ok(())
    }

    async fn has_state(&self, root: Digest, leaf_count: u64) -> Result<bool, TallyError> {
        Ok(self.get_raw(&Self::state_key(&root, leaf_count))?.is_some())
    }

    async fn load_state(
        &self,
        root: Digest,
    ) -> Result<Option<Vec<(ReputationKey, ReputationValue)>>, TallyError> {
        if !self.has_root(&root)? {
            return Ok(None);
        }
        let prefix_str = Self::leaf_prefix(&root);
        let prefix = prefix_str.as_bytes();
        let mut leaves = Vec::new();

        let iter = self.db.prefix_iterator(prefix);
        for item in iter {
            let (key, value) =
                item.map_err(|e| TallyError::Storage(format!("RocksDB iteration error: {}", e)))?;

            // Keys are `leaf:{root_hex}:{key_hex}`. Stop when the prefix no
            // longer matches.
            if !key.starts_with(prefix) {
                break;
            }

            let key_hex = &key[prefix.len()..];
            let key_bytes = hex::decode(key_hex)
                .map_err(|e| TallyError::Storage(format!("corrupt leaf row key: {}", e)))?;
            let reputation_key = ReputationKey::decode(&key_bytes)?;
            let reputation_value = ReputationValue::decode(&value)?;
            leaves.push((reputation_key, reputation_value));
        }

        Ok(Some(leaves))
    }

    async fn get_leaf(
        &self,
        root: Digest,
        key: &ReputationKey,
    ) -> Result<Option<ReputationValue>, TallyError> {
        match self.get_raw(&Self::leaf_key(&root, key))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(ReputationValue::decode(&bytes)?)),
        }
    }
}
