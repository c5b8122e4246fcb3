// crates/tally-dispute/src/arbiter.rs
//
// The on-chain arbiter as seen from the dispute engine: submission,
// confirmation, and challenge entry points, plus the bracket state the
// engine inspects on demand. The real implementation wraps the arbiter
// contract; tests drive the engine against a mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tally_core::{Digest, ReputationKey, ReputationValue, TallyError};
use tally_engine::{JustificationSnapshot, KeyProofMaterial};
use tally_trie::Proof;

/// Conservative cost ceiling used when gas estimation fails. Estimation
/// failure degrades to this, never to an aborted submission.
pub const FALLBACK_GAS_LIMIT: u64 = 6_000_000;

/// One miner's position in the arbiter's challenge bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeSubmission {
    pub proposed_root: Digest,
    pub leaf_count: u64,
    pub justification_root: Digest,
    /// Bracket coordinates assigned by the arbiter, looked up by matching
    /// the submitted values.
    pub round: u64,
    pub index: u64,
}

/// A justification-trie entry with its full proof, as submitted for
/// confirmation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryProofSubmission {
    pub index: u64,
    pub snapshot: JustificationSnapshot,
    pub proof: Proof,
}

/// One binary-search response: the candidate entry plus a proof shrunk
/// from the front so that it folds to the arbiter's recorded target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySearchStep {
    pub index: u64,
    pub snapshot: JustificationSnapshot,
    pub proof: Proof,
}

/// The full bundle defending one disputed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// The update number under dispute.
    pub disputed_update: u64,
    /// Justification entry before the disputed update.
    pub previous_state: EntryProofSubmission,
    /// Justification entry after the disputed update.
    pub next_state: EntryProofSubmission,
    /// The key the update wrote, with its before/after values.
    pub key: ReputationKey,
    pub value_before: Option<ReputationValue>,
    pub value_after: ReputationValue,
    pub delta: i128,
    /// Proof of the updated key against the previous interim root (or the
    /// adjacency substitute when the key did not exist yet).
    pub key_proof: Option<KeyProofMaterial>,
    /// Origin-skill proof, present only if replay consulted it.
    pub origin_proof: Option<KeyProofMaterial>,
    /// Child proof, present only if replay consulted it.
    pub child_proof: Option<KeyProofMaterial>,
}

/// Entry points and bracket state of the external arbiter contract.
///
/// Failures carry the revert reason unchanged; callers own retry policy.
#[async_trait]
pub trait ReputationArbiter: Send + Sync {
    /// Estimate the cost of an operation. May fail without consequence;
    /// the engine falls back to [`FALLBACK_GAS_LIMIT`].
    async fn estimate_gas(&self, operation: &str) -> Result<u64, TallyError>;

    /// Submit a proposed (root, leaf count, justification root).
    async fn submit_root_hash(
        &self,
        submission: &DisputeSubmission,
        gas_limit: u64,
    ) -> Result<(), TallyError>;

    /// Bracket coordinates the arbiter assigned to a submission, located by
    /// matching the submitted values.
    async fn assigned_position(
        &self,
        proposed_root: Digest,
        leaf_count: u64,
        justification_root: Digest,
    ) -> Result<Option<(u64, u64)>, TallyError>;

    /// Prove the first and last justification entries of the pass.
    async fn confirm_justification(
        &self,
        round: u64,
        index: u64,
        first: EntryProofSubmission,
        last: EntryProofSubmission,
    ) -> Result<(), TallyError>;

    /// The entry index the binary search currently wants proven, or `None`
    /// once the search has narrowed to a single entry.
    async fn search_candidate(&self, round: u64, index: u64) -> Result<Option<u64>, TallyError>;

    /// The intermediate hash this submission last agreed to; shrunk proofs
    /// must fold to it.
    async fn recorded_target(&self, round: u64, index: u64) -> Result<Digest, TallyError>;

    /// Answer the current search round.
    async fn respond_binary_search(
        &self,
        round: u64,
        index: u64,
        step: BinarySearchStep,
    ) -> Result<(), TallyError>;

    /// The first disagreeing justification entry, once the search finished.
    async fn narrowed_entry(&self, round: u64, index: u64) -> Result<Option<u64>, TallyError>;

    /// Prove the final narrowed entry in full.
    async fn confirm_binary_search(
        &self,
        round: u64,
        index: u64,
        entry: EntryProofSubmission,
    ) -> Result<(), TallyError>;

    /// Submit the single-step challenge response.
    async fn respond_to_challenge(
        &self,
        round: u64,
        index: u64,
        response: ChallengeResponse,
    ) -> Result<(), TallyError>;

    /// Whether the bracket has resolved this submission's dispute.
    async fn resolved(&self, round: u64, index: u64) -> Result<bool, TallyError>;
}
