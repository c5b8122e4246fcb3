// crates/tally-sync/src/lib.rs
//
// tally-sync: state recovery for the Tally Protocol.
//
// Replays on-chain "cycle complete" checkpoints to rebuild reputation state
// after a restart or interruption. Scans newest-first for a checkpoint the
// durable store already holds, loads it, and replays forward pass-by-pass;
// a final mismatch against the canonical hash is a warning, not a crash;
// a retry or full resync is the remedial action.

pub mod config;

use tracing::{info, warn};

use tally_core::{
    short_hex, CheckpointSource, SkillHierarchy, SnapshotStore, TallyError, UpdateLogSource,
};
use tally_engine::{HonestPolicy, Replayer, ReputationState};
use tally_trie::BackendKind;

pub use config::MinerConfig;

/// Rebuilds reputation state from checkpoint history.
pub struct Synchronizer {
    backend: BackendKind,
    persist_states: bool,
}

impl Synchronizer {
    pub fn new(backend: BackendKind, persist_states: bool) -> Self {
        Self {
            backend,
            persist_states,
        }
    }

    /// Recover the current reputation state.
    ///
    /// `current` is the engine's in-memory state, if any; it is only
    /// consulted to decide whether a from-genesis replay is the expected
    /// cold start or a recovery that merits a warning.
    pub async fn sync(
        &self,
        current: Option<&ReputationState>,
        checkpoints: &dyn CheckpointSource,
        log_source: &dyn UpdateLogSource,
        skills: &dyn SkillHierarchy,
        store: &dyn SnapshotStore,
    ) -> Result<ReputationState, TallyError> {
        let history = checkpoints.checkpoints().await?;

        // Newest-first: find the most recent checkpoint the store holds.
        let mut state: Option<ReputationState> = None;
        let mut resume_from = 0usize;
        for (position, checkpoint) in history.iter().enumerate().rev() {
            if store.has_state(checkpoint.root, checkpoint.leaf_count).await? {
                let leaves = store.load_state(checkpoint.root).await?.ok_or_else(|| {
                    TallyError::NotFound(format!(
                        "store reports state {} but cannot load it",
                        short_hex(&checkpoint.root)
                    ))
                })?;
                let loaded = ReputationState::from_leaves(self.backend, leaves)?;
                if loaded.root_hash() != checkpoint.root {
                    return Err(TallyError::Consistency(format!(
                        "stored leaves for cycle {} rebuild to a different root",
                        checkpoint.cycle
                    )));
                }
                info!(cycle = checkpoint.cycle, "resuming from stored checkpoint state");
                state = Some(loaded);
                resume_from = position + 1;
                break;
            }
        }

        let mut state = match state {
            Some(state) => state,
            None => {
                if current.map(|s| s.leaf_count() != 0).unwrap_or(false) {
                    warn!("no stored checkpoint matches; discarding in-memory state for a full resync");
                }
                ReputationState::new(self.backend)
            }
        };

        // Oldest-first from the resume point: one replay pass per cycle.
        let replayer = Replayer::new(self.backend);
        for checkpoint in &history[resume_from..] {
            let log = log_source.entries(checkpoint.cycle).await?;
            let outcome = replayer
                .replay_pass(&state, &log, &checkpoint.decay, skills, &HonestPolicy)
                .await?;
            state = outcome.state;
            if state.root_hash() != checkpoint.root
                || state.leaf_count() != checkpoint.leaf_count
            {
                warn!(
                    cycle = checkpoint.cycle,
                    "replayed state diverges from its checkpoint"
                );
            }
            if self.persist_states {
                store
                    .save_state(state.root_hash(), state.leaf_count(), &state.leaves_in_order())
                    .await?;
            }
        }

        let (canonical_root, canonical_leaf_count) = checkpoints.canonical().await?;
        if state.root_hash() != canonical_root || state.leaf_count() != canonical_leaf_count {
            warn!(
                got = %short_hex(&state.root_hash()),
                want = %short_hex(&canonical_root),
                "recovered state does not match the canonical hash; retry or full resync advised"
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tally_core::{
        Address, Checkpoint, DecayRate, Digest, ReputationKey, ReputationValue, UpdateLogEntry,
    };
    use tally_engine::InMemorySkillTree;

    const COLONY: Address = Address([0x0c; 20]);
    const USER: Address = Address([0x0e; 20]);

    // In-memory SnapshotStore double.
    #[derive(Default)]
    struct MemoryStore {
        states: Mutex<HashMap<(Digest, u64), Vec<(ReputationKey, ReputationValue)>>>,
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn save_state(
            &self,
            root: Digest,
            leaf_count: u64,
            leaves: &[(ReputationKey, ReputationValue)],
        ) -> Result<(), TallyError> {
            self.states
                .lock()
                .unwrap()
                .insert((root, leaf_count), leaves.to_vec());
            Ok(())
        }

        async fn has_state(&self, root: Digest, leaf_count: u64) -> Result<bool, TallyError> {
            Ok(self
                .states
                .lock()
                .unwrap()
                .contains_key(&(root, leaf_count)))
        }

        async fn load_state(
            &self,
            root: Digest,
        ) -> Result<Option<Vec<(ReputationKey, ReputationValue)>>, TallyError> {
            Ok(self
                .states
                .lock()
                .unwrap()
                .iter()
                .find(|((r, _), _)| *r == root)
                .map(|(_, leaves)| leaves.clone()))
        }

        async fn get_leaf(
            &self,
            root: Digest,
            key: &ReputationKey,
        ) -> Result<Option<ReputationValue>, TallyError> {
            Ok(self.load_state(root).await?.and_then(|leaves| {
                leaves
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, value)| *value)
            }))
        }
    }

    struct MemoryChain {
        checkpoints: Vec<Checkpoint>,
        logs: HashMap<u64, Vec<UpdateLogEntry>>,
        canonical: (Digest, u64),
    }

    #[async_trait]
    impl CheckpointSource for MemoryChain {
        async fn checkpoints(&self) -> Result<Vec<Checkpoint>, TallyError> {
            Ok(self.checkpoints.clone())
        }

        async fn canonical(&self) -> Result<(Digest, u64), TallyError> {
            Ok(self.canonical)
        }
    }

    #[async_trait]
    impl UpdateLogSource for MemoryChain {
        async fn entries(&self, cycle: u64) -> Result<Vec<UpdateLogEntry>, TallyError> {
            self.logs
                .get(&cycle)
                .cloned()
                .ok_or_else(|| TallyError::NotFound(format!("log for cycle {}", cycle)))
        }
    }

    fn decay() -> DecayRate {
        DecayRate {
            numerator: 1,
            denominator: 1,
        }
    }

    fn entry(skill: u64, amount: i128, n_updates: u64, n_previous_updates: u64) -> UpdateLogEntry {
        UpdateLogEntry {
            user: USER,
            amount,
            skill,
            colony: COLONY,
            n_updates,
            n_previous_updates,
        }
    }

    fn skill_tree() -> InMemorySkillTree {
        let mut tree = InMemorySkillTree::new();
        tree.add_skill(1, None);
        tree.add_skill(2, Some(1));
        tree
    }

    /// Three cycles of history with checkpoints computed by an honest
    /// replay of each cycle's log.
    async fn build_chain() -> (MemoryChain, InMemorySkillTree, Vec<ReputationState>) {
        let tree = skill_tree();
        let replayer = Replayer::new(BackendKind::Incremental);
        let mut state = ReputationState::new(BackendKind::Incremental);
        let mut checkpoints = Vec::new();
        let mut logs = HashMap::new();
        let mut states = Vec::new();

        let cycle_specs: Vec<Vec<(u64, i128, u64)>> = vec![
            vec![(1, 100, 2)],
            vec![(2, 40, 4), (1, -10, 4)],
            vec![(1, 25, 2)],
        ];
        for (cycle, specs) in cycle_specs.into_iter().enumerate() {
            let mut running = state.leaf_count();
            let mut log = Vec::new();
            for (skill, amount, n_updates) in specs {
                log.push(entry(skill, amount, n_updates, running));
                running += n_updates;
            }
            let outcome = replayer
                .replay_pass(&state, &log, &decay(), &tree, &HonestPolicy)
                .await
                .unwrap();
            state = outcome.state;
            checkpoints.push(Checkpoint {
                cycle: cycle as u64,
                root: state.root_hash(),
                leaf_count: state.leaf_count(),
                decay: decay(),
            });
            logs.insert(cycle as u64, log);
            states.push(state.fork().unwrap());
        }

        let canonical = (state.root_hash(), state.leaf_count());
        (
            MemoryChain {
                checkpoints,
                logs,
                canonical,
            },
            tree,
            states,
        )
    }

    #[tokio::test]
    async fn cold_start_replays_from_genesis() {
        let (chain, tree, _states) = build_chain().await;
        let store = MemoryStore::default();
        let synchronizer = Synchronizer::new(BackendKind::Incremental, false);

        let recovered = synchronizer
            .sync(None, &chain, &chain, &tree, &store)
            .await
            .unwrap();
        assert_eq!(
            (recovered.root_hash(), recovered.leaf_count()),
            chain.canonical
        );
    }

    #[tokio::test]
    async fn resume_from_cached_checkpoint_matches_genesis_replay() {
        // Scenario C: a client holding only the middle checkpoint's state
        // must reach the same final root as one that replayed everything.
        let (chain, tree, states) = build_chain().await;

        let full_store = MemoryStore::default();
        let synchronizer = Synchronizer::new(BackendKind::Incremental, false);
        let from_genesis = synchronizer
            .sync(None, &chain, &chain, &tree, &full_store)
            .await
            .unwrap();

        let cached_store = MemoryStore::default();
        let middle = &states[1];
        cached_store
            .save_state(
                middle.root_hash(),
                middle.leaf_count(),
                &middle.leaves_in_order(),
            )
            .await
            .unwrap();
        let resumed = synchronizer
            .sync(None, &chain, &chain, &tree, &cached_store)
            .await
            .unwrap();

        assert_eq!(resumed.root_hash(), from_genesis.root_hash());
        assert_eq!(resumed.leaf_count(), from_genesis.leaf_count());
        assert_eq!((resumed.root_hash(), resumed.leaf_count()), chain.canonical);
    }

    #[tokio::test]
    async fn persisting_sync_stores_every_replayed_state() {
        let (chain, tree, _states) = build_chain().await;
        let store = MemoryStore::default();
        let synchronizer = Synchronizer::new(BackendKind::Incremental, true);

        let recovered = synchronizer
            .sync(None, &chain, &chain, &tree, &store)
            .await
            .unwrap();
        for checkpoint in &chain.checkpoints {
            assert!(store
                .has_state(checkpoint.root, checkpoint.leaf_count)
                .await
                .unwrap());
        }
        // A second sync now resumes from the newest stored state without
        // touching earlier cycles' logs.
        let again = synchronizer
            .sync(Some(&recovered), &chain, &chain, &tree, &store)
            .await
            .unwrap();
        assert_eq!(again.root_hash(), recovered.root_hash());
    }

    #[tokio::test]
    async fn canonical_mismatch_is_not_fatal() {
        let (mut chain, tree, _states) = build_chain().await;
        chain.canonical = ([0x77; 32], 999);
        let store = MemoryStore::default();
        let synchronizer = Synchronizer::new(BackendKind::Incremental, false);

        // The divergence is logged as a warning; the partially recovered
        // state is still returned for the caller to retry with.
        let recovered = synchronizer
            .sync(None, &chain, &chain, &tree, &store)
            .await
            .unwrap();
        assert_ne!(recovered.root_hash(), [0x77; 32]);
    }
}
