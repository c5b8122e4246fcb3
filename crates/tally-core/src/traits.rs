// crates/tally-core/src/traits.rs

use async_trait::async_trait;

use crate::crypto::Digest;
use crate::error::TallyError;
use crate::log::{Checkpoint, UpdateLogEntry};
use crate::reputation::{ReputationKey, ReputationValue, SkillId};

/// Read access to the external, append-only reputation update log.
///
/// Implemented by the ledger-contract client; mocked in tests.
#[async_trait]
pub trait UpdateLogSource: Send + Sync {
    /// All entries of one mining cycle's log, in on-chain order, with their
    /// `n_updates` / `n_previous_updates` prefix-sum fields populated.
    async fn entries(&self, cycle: u64) -> Result<Vec<UpdateLogEntry>, TallyError>;
}

/// Query interface over the external skill hierarchy.
///
/// Skill identifiers are stable numbers assigned by the ledger contract;
/// the tree shape never changes retroactively within a cycle.
#[async_trait]
pub trait SkillHierarchy: Send + Sync {
    /// Number of ancestors of a skill (0 for a root skill).
    async fn n_parents(&self, skill: SkillId) -> Result<u64, TallyError>;

    /// The `index`-th ancestor of a skill, nearest first.
    async fn parent_skill_at(&self, skill: SkillId, index: u64) -> Result<SkillId, TallyError>;

    /// The `index`-th descendant of a skill, in the hierarchy's own order.
    async fn child_skill_at(&self, skill: SkillId, index: u64) -> Result<SkillId, TallyError>;
}

/// Stream of on-chain "cycle complete" checkpoints, used to rebuild state
/// after restart or interruption.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// All checkpoints, oldest first.
    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, TallyError>;

    /// The externally reported canonical (root hash, leaf count) a recovered
    /// engine must converge to.
    async fn canonical(&self) -> Result<(Digest, u64), TallyError>;
}

/// Durable storage of accepted reputation states, indexed by
/// (root hash, leaf count).
///
/// Implemented by tally-store (RocksDB backend).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist one full state under its (root, leaf count) identity.
    /// Overwrites any prior snapshot of the same state.
    async fn save_state(
        &self,
        root: Digest,
        leaf_count: u64,
        leaves: &[(ReputationKey, ReputationValue)],
    ) -> Result<(), TallyError>;

    /// Whether a snapshot of the given state identity exists.
    async fn has_state(&self, root: Digest, leaf_count: u64) -> Result<bool, TallyError>;

    /// Load every leaf of a stored state, or `None` if the root is unknown.
    async fn load_state(
        &self,
        root: Digest,
    ) -> Result<Option<Vec<(ReputationKey, ReputationValue)>>, TallyError>;

    /// Point lookup of one leaf in a stored state.
    async fn get_leaf(
        &self,
        root: Digest,
        key: &ReputationKey,
    ) -> Result<Option<ReputationValue>, TallyError>;
}
