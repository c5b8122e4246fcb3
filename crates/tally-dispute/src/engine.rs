// crates/tally-dispute/src/engine.rs
//
// The dispute state machine. Transition triggers come from the arbiter's
// bracket state, inspected on demand; polling cadence belongs to the
// client-orchestration layer, not here.
//
// Every proof submitted on-chain is first revalidated against the local
// justification material. A mismatch means a bug or corrupted engine state,
// and the affected operation halts rather than submit invalid data.

use tracing::{debug, error, warn};

use tally_core::{apply_delta, Digest, TallyError};
use tally_engine::{index_key, JustificationTrie, KeyProofMaterial, ReputationState};
use tally_trie::{fold_from_leaf, implied_root, leaf_hash, Proof};

use crate::arbiter::{
    BinarySearchStep, ChallengeResponse, DisputeSubmission, EntryProofSubmission,
    ReputationArbiter, FALLBACK_GAS_LIMIT,
};

/// Phases of one dispute session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputePhase {
    Idle,
    Submitted,
    JustificationConfirmed,
    BinarySearching,
    BinaryConfirmed,
    ChallengeResponded,
    Resolved,
}

/// Drives one submission through the arbiter's challenge bracket.
///
/// Sessions are independent: each is keyed by the (round, index) the
/// arbiter assigned, and no state is shared between concurrent disputes.
pub struct DisputeEngine {
    phase: DisputePhase,
    submission: Option<DisputeSubmission>,
}

impl DisputeEngine {
    pub fn new() -> Self {
        Self {
            phase: DisputePhase::Idle,
            submission: None,
        }
    }

    pub fn phase(&self) -> DisputePhase {
        self.phase
    }

    pub fn submission(&self) -> Option<&DisputeSubmission> {
        self.submission.as_ref()
    }

    fn position(&self) -> Result<(u64, u64), TallyError> {
        let submission = self
            .submission
            .as_ref()
            .ok_or_else(|| TallyError::InvalidState("no active submission".to_string()))?;
        Ok((submission.round, submission.index))
    }

    fn require_phase(&self, expected: &[DisputePhase], operation: &str) -> Result<(), TallyError> {
        if expected.contains(&self.phase) {
            Ok(())
        } else {
            Err(TallyError::InvalidState(format!(
                "{} is not valid in phase {:?}",
                operation, self.phase
            )))
        }
    }

    /// Submit the pass's (root, leaf count, justification root) and look up
    /// the bracket position the arbiter assigned to it.
    pub async fn submit(
        &mut self,
        arbiter: &dyn ReputationArbiter,
        state: &ReputationState,
        justification: &JustificationTrie,
    ) -> Result<DisputeSubmission, TallyError> {
        self.require_phase(&[DisputePhase::Idle], "submit")?;

        let gas_limit = match arbiter.estimate_gas("submit_root_hash").await {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(error = %e, fallback = FALLBACK_GAS_LIMIT, "gas estimation failed, using fallback ceiling");
                FALLBACK_GAS_LIMIT
            }
        };

        let mut submission = DisputeSubmission {
            proposed_root: state.root_hash(),
            leaf_count: state.leaf_count(),
            justification_root: justification.root_hash(),
            round: 0,
            index: 0,
        };
        arbiter.submit_root_hash(&submission, gas_limit).await?;

        let (round, index) = arbiter
            .assigned_position(
                submission.proposed_root,
                submission.leaf_count,
                submission.justification_root,
            )
            .await?
            .ok_or_else(|| {
                TallyError::External("arbiter did not assign a bracket position".to_string())
            })?;
        submission.round = round;
        submission.index = index;
        debug!(round, index, "root hash submitted");

        self.submission = Some(submission);
        self.phase = DisputePhase::Submitted;
        Ok(submission)
    }

    /// Prove the pass's start and end states: justification indices 0 and
    /// total_updates.
    pub async fn confirm_justification(
        &mut self,
        arbiter: &dyn ReputationArbiter,
        justification: &JustificationTrie,
    ) -> Result<(), TallyError> {
        self.require_phase(&[DisputePhase::Submitted], "confirm_justification")?;
        let (round, index) = self.position()?;
        if justification.is_empty() {
            return Err(TallyError::InvalidState(
                "cannot confirm an empty justification trie".to_string(),
            ));
        }
        let last_index = justification.len() - 1;
        let first = self.entry_submission(justification, 0)?;
        let last = self.entry_submission(justification, last_index)?;
        arbiter
            .confirm_justification(round, index, first, last)
            .await?;
        self.phase = DisputePhase::JustificationConfirmed;
        Ok(())
    }

    /// Answer one binary-search round: prove the arbiter's candidate entry,
    /// shrinking the proof from the front until it folds to the recorded
    /// target. Returns the candidate answered, or `None` once the search
    /// has narrowed.
    pub async fn binary_search_step(
        &mut self,
        arbiter: &dyn ReputationArbiter,
        justification: &JustificationTrie,
    ) -> Result<Option<u64>, TallyError> {
        self.require_phase(
            &[
                DisputePhase::JustificationConfirmed,
                DisputePhase::BinarySearching,
            ],
            "binary_search_step",
        )?;
        let (round, index) = self.position()?;
        self.phase = DisputePhase::BinarySearching;

        let candidate = match arbiter.search_candidate(round, index).await? {
            None => return Ok(None),
            Some(candidate) => candidate,
        };
        let target = arbiter.recorded_target(round, index).await?;
        let (snapshot, proof) = justification.entry_proof(candidate)?;
        let shrunk = shrink_to_target(&index_key(candidate), &snapshot.encode(), &proof, target)?;
        debug!(
            candidate,
            dropped = proof.siblings.len() - shrunk.siblings.len(),
            "responding to binary search round"
        );
        arbiter
            .respond_binary_search(
                round,
                index,
                BinarySearchStep {
                    index: candidate,
                    snapshot,
                    proof: shrunk,
                },
            )
            .await?;
        Ok(Some(candidate))
    }

    /// Prove the final narrowed entry in full. Returns the entry index.
    pub async fn confirm_binary_search_result(
        &mut self,
        arbiter: &dyn ReputationArbiter,
        justification: &JustificationTrie,
    ) -> Result<u64, TallyError> {
        self.require_phase(&[DisputePhase::BinarySearching], "confirm_binary_search_result")?;
        let (round, index) = self.position()?;
        let narrowed = arbiter.narrowed_entry(round, index).await?.ok_or_else(|| {
            TallyError::InvalidState("binary search has not narrowed yet".to_string())
        })?;
        let entry = self.entry_submission(justification, narrowed)?;
        arbiter.confirm_binary_search(round, index, entry).await?;
        self.phase = DisputePhase::BinaryConfirmed;
        Ok(narrowed)
    }

    /// Assemble and submit the bundle defending the one disputed update.
    ///
    /// Every field is revalidated against the recorded justification
    /// material first; any mismatch halts the operation as a fatal
    /// consistency failure instead of submitting invalid data on-chain.
    pub async fn respond_to_challenge(
        &mut self,
        arbiter: &dyn ReputationArbiter,
        justification: &JustificationTrie,
    ) -> Result<(), TallyError> {
        self.require_phase(&[DisputePhase::BinaryConfirmed], "respond_to_challenge")?;
        let (round, index) = self.position()?;
        let narrowed = arbiter.narrowed_entry(round, index).await?.ok_or_else(|| {
            TallyError::InvalidState("binary search has not narrowed yet".to_string())
        })?;
        if narrowed == 0 {
            return Err(TallyError::Consistency(
                "search narrowed to entry 0, which both sides agreed on at submission".to_string(),
            ));
        }
        let disputed_update = narrowed - 1;

        let response =
            match self.assemble_challenge_response(justification, disputed_update, narrowed) {
                Ok(response) => response,
                Err(e) => {
                    error!(disputed_update, error = %e, "challenge response failed local validation, halting");
                    return Err(e);
                }
            };
        arbiter.respond_to_challenge(round, index, response).await?;
        self.phase = DisputePhase::ChallengeResponded;
        Ok(())
    }

    /// Poll the arbiter for resolution of this session's dispute.
    pub async fn check_resolution(
        &mut self,
        arbiter: &dyn ReputationArbiter,
    ) -> Result<bool, TallyError> {
        self.require_phase(&[DisputePhase::ChallengeResponded], "check_resolution")?;
        let (round, index) = self.position()?;
        if arbiter.resolved(round, index).await? {
            self.phase = DisputePhase::Resolved;
            return Ok(true);
        }
        Ok(false)
    }

    fn entry_submission(
        &self,
        justification: &JustificationTrie,
        index: u64,
    ) -> Result<EntryProofSubmission, TallyError> {
        let (snapshot, proof) = justification.entry_proof(index)?;
        let path = index_key(index);
        let folded = fold_from_leaf(&path, leaf_hash(&path, &snapshot.encode()), &proof)?;
        if folded != justification.root_hash() {
            return Err(TallyError::Consistency(format!(
                "justification entry {} does not fold to the committed root",
                index
            )));
        }
        Ok(EntryProofSubmission {
            index,
            snapshot,
            proof,
        })
    }

    fn assemble_challenge_response(
        &self,
        justification: &JustificationTrie,
        disputed_update: u64,
        narrowed: u64,
    ) -> Result<ChallengeResponse, TallyError> {
        let previous_state = self.entry_submission(justification, disputed_update)?;
        let next_state = self.entry_submission(justification, narrowed)?;
        let record = justification
            .entry(disputed_update)?
            .update
            .as_ref()
            .ok_or_else(|| {
                TallyError::Consistency(format!(
                    "justification entry {} carries no update record",
                    disputed_update
                ))
            })?
            .clone();

        let interim_root = previous_state.snapshot.interim_root;
        if let Some(material) = &record.key_proof {
            verify_material(material, interim_root, "updated key")?;
            match material.adjacent_for {
                None => {
                    if record.value_before != Some(material.value) {
                        return Err(TallyError::Consistency(format!(
                            "recorded before-value for {} does not match its proof",
                            record.key
                        )));
                    }
                }
                Some(absent) => {
                    if absent != record.key || record.value_before.is_some() {
                        return Err(TallyError::Consistency(format!(
                            "adjacency substitute for {} is inconsistent with the record",
                            record.key
                        )));
                    }
                }
            }
        } else if record.value_before.is_some() {
            return Err(TallyError::Consistency(format!(
                "update of existing key {} recorded no inclusion proof",
                record.key
            )));
        }
        if let Some(material) = &record.origin_proof {
            verify_material(material, interim_root, "origin reputation")?;
        }
        if let Some(material) = &record.child_proof {
            verify_material(material, interim_root, "child reputation")?;
        }

        let expected_after = apply_delta(record.value_before.map(|v| v.amount), record.delta);
        if expected_after != record.value_after.amount {
            return Err(TallyError::Consistency(format!(
                "recorded delta {} does not reproduce the after-value of {}",
                record.delta, record.key
            )));
        }

        Ok(ChallengeResponse {
            disputed_update,
            previous_state,
            next_state,
            key: record.key,
            value_before: record.value_before,
            value_after: record.value_after,
            delta: record.delta,
            key_proof: record.key_proof,
            origin_proof: record.origin_proof,
            child_proof: record.child_proof,
        })
    }
}

impl Default for DisputeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Check one piece of consulted-proof material against an interim root.
fn verify_material(
    material: &KeyProofMaterial,
    interim_root: Digest,
    what: &str,
) -> Result<(), TallyError> {
    let implied = implied_root(
        &material.key.digest(),
        &material.value.encode(),
        &material.proof,
    )?;
    if implied != interim_root {
        return Err(TallyError::Consistency(format!(
            "{} proof for {} does not fold to the interim root",
            what, material.key
        )));
    }
    Ok(())
}

/// Drop leading siblings until the fold reproduces the arbiter's recorded
/// target. The full proof folds to the justification root; each dropped
/// level descends one branching step along the candidate's path, so the
/// first matching prefix is the proof relative to the agreed subtree.
fn shrink_to_target(
    path: &Digest,
    snapshot_bytes: &[u8],
    proof: &Proof,
    target: Digest,
) -> Result<Proof, TallyError> {
    let leaf = leaf_hash(path, snapshot_bytes);
    for dropped in 0..=proof.siblings.len() {
        let shrunk = proof.drop_front(dropped);
        if fold_from_leaf(path, leaf, &shrunk)? == target {
            return Ok(shrunk);
        }
    }
    Err(TallyError::Consistency(
        "no prefix of the entry proof folds to the arbiter's recorded target".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_trie::{set_mask_bit, branch_hash};
    use primitive_types::U256;

    #[test]
    fn phase_gating_rejects_out_of_order_operations() {
        let engine = DisputeEngine::new();
        assert!(engine
            .require_phase(&[DisputePhase::Submitted], "confirm_justification")
            .is_err());
        assert!(engine.require_phase(&[DisputePhase::Idle], "submit").is_ok());
    }

    #[test]
    fn shrink_finds_the_matching_prefix() {
        // Build a tiny two-level proof by hand and check each target depth.
        let path = [0u8; 32];
        let value = b"snapshot";
        let leaf = leaf_hash(&path, value);
        let sib_deep = [0x11u8; 32];
        let sib_top = [0x22u8; 32];
        let mut mask = U256::zero();
        set_mask_bit(&mut mask, 254);
        set_mask_bit(&mut mask, 255);
        let proof = Proof {
            branch_mask: mask,
            siblings: vec![sib_top, sib_deep],
        };

        // Path bits are all zero, so the leaf folds on the left each time.
        let level_one = branch_hash(&leaf, &sib_deep);
        let root = branch_hash(&level_one, &sib_top);

        let full = shrink_to_target(&path, value, &proof, root).unwrap();
        assert_eq!(full.siblings.len(), 2);
        let mid = shrink_to_target(&path, value, &proof, level_one).unwrap();
        assert_eq!(mid.siblings.len(), 1);
        let bottom = shrink_to_target(&path, value, &proof, leaf).unwrap();
        assert!(bottom.siblings.is_empty());

        assert!(shrink_to_target(&path, value, &proof, [0x33u8; 32]).is_err());
    }
}
