// crates/tally-engine/src/replay.rs
//
// The log replayer: expands one cycle's update log into individual
// reputation deltas and applies them to a fresh fork of the previous
// state, recording one justification entry per update.
//
// Update numbering over one pass:
//   [0, previous_leaf_count)      decay of every previously existing key,
//                                 in preserved insertion order
//   [previous_leaf_count, total)  log-entry updates, located by prefix-sum
//                                 search over n_previous_updates
//
// Within one log entry's n_updates range: the first half is colony-wide,
// the second half user-specific; within a half, child skills, then parent
// skills, then the skill itself.

use tracing::debug;

use tally_core::{
    apply_delta, decay_amount, owning_entry_index, proportional_amount, Address, DecayRate,
    ReputationKey, SkillHierarchy, TallyError, UpdateLogEntry,
};
use tally_trie::BackendKind;

use crate::justification::{
    JustificationEntry, JustificationSnapshot, JustificationTrie, KeyProofMaterial, UpdateRecord,
};
use crate::policy::ReplayPolicy;
use crate::state::ReputationState;

/// Result of one completed replay pass.
pub struct ReplayOutcome {
    pub state: ReputationState,
    pub justification: JustificationTrie,
    pub total_updates: u64,
}

/// Replays update logs against reputation states.
pub struct Replayer {
    backend: BackendKind,
}

/// The resolved shape of one log-entry update: which key it writes and the
/// consulted material behind its delta.
struct ResolvedDelta {
    key: ReputationKey,
    honest_delta: i128,
    origin_proof: Option<KeyProofMaterial>,
    child_proof: Option<KeyProofMaterial>,
}

impl Replayer {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }

    /// Replay one full pass. Pure in (previous state, log, decay, policy):
    /// the same inputs always produce the same resulting state and the same
    /// justification sequence, so an interrupted pass is simply discarded
    /// and restarted.
    pub async fn replay_pass(
        &self,
        previous: &ReputationState,
        log: &[UpdateLogEntry],
        decay: &DecayRate,
        skills: &dyn SkillHierarchy,
        policy: &dyn ReplayPolicy,
    ) -> Result<ReplayOutcome, TallyError> {
        let previous_leaf_count = previous.leaf_count();
        validate_log(log, previous_leaf_count)?;
        let total_updates =
            previous_leaf_count + log.iter().map(|entry| entry.n_updates).sum::<u64>();

        let mut state = previous.fork()?;
        let mut justification = JustificationTrie::new(self.backend);

        for update_number in 0..total_updates {
            let snapshot = JustificationSnapshot {
                interim_root: state.root_hash(),
                leaf_count: state.leaf_count(),
            };

            let resolved = if update_number < previous_leaf_count {
                self.resolve_decay(&state, update_number, decay, policy)?
            } else {
                self.resolve_log_update(&state, log, update_number, skills, policy)
                    .await?
            };

            let delta = policy.delta_for_update(update_number, &resolved.key, resolved.honest_delta);
            let value_before = state.get(&resolved.key);
            let new_amount = apply_delta(value_before.map(|v| v.amount), delta);
            let key_proof = consulted_proof(&state, &resolved.key)?;

            let (value_after, _root) = state.set_amount(&resolved.key, new_amount)?;
            debug!(
                update_number,
                key = %resolved.key,
                delta,
                amount = new_amount,
                "applied reputation update"
            );

            justification.append(JustificationEntry {
                index: update_number,
                snapshot,
                update: Some(UpdateRecord {
                    key: resolved.key,
                    value_before,
                    value_after,
                    delta,
                    key_proof,
                    origin_proof: resolved.origin_proof,
                    child_proof: resolved.child_proof,
                }),
            })?;
        }

        // Final snapshot entry: indices run 0..=total_updates.
        justification.append(JustificationEntry {
            index: total_updates,
            snapshot: JustificationSnapshot {
                interim_root: state.root_hash(),
                leaf_count: state.leaf_count(),
            },
            update: None,
        })?;

        Ok(ReplayOutcome {
            state,
            justification,
            total_updates,
        })
    }

    fn resolve_decay(
        &self,
        state: &ReputationState,
        update_number: u64,
        decay: &DecayRate,
        policy: &dyn ReplayPolicy,
    ) -> Result<ResolvedDelta, TallyError> {
        let key = *state.key_at(update_number).ok_or_else(|| {
            TallyError::Consistency(format!(
                "decay update {} has no key in insertion order",
                update_number
            ))
        })?;
        let current = policy
            .lookup_value(update_number, &key, state.get(&key))
            .map(|v| v.amount)
            .unwrap_or(0);
        let decayed = decay_amount(current, decay)?;
        Ok(ResolvedDelta {
            key,
            honest_delta: decayed as i128 - current as i128,
            origin_proof: None,
            child_proof: None,
        })
    }

    async fn resolve_log_update(
        &self,
        state: &ReputationState,
        log: &[UpdateLogEntry],
        update_number: u64,
        skills: &dyn SkillHierarchy,
        policy: &dyn ReplayPolicy,
    ) -> Result<ResolvedDelta, TallyError> {
        let entry = &log[owning_entry_index(log, update_number)?];
        let relative = update_number - entry.n_previous_updates;
        let half = entry.n_updates / 2;
        let user = if relative < half {
            Address::ZERO
        } else {
            entry.user
        };
        let position = relative % half;

        let n_parents = skills.n_parents(entry.skill).await?;
        // Child propagation happens only for strictly negative amounts;
        // zero counts as non-negative. Gained reputation never propagates
        // down into child skills.
        let n_child_updates = if entry.amount < 0 {
            half.checked_sub(1 + n_parents).ok_or_else(|| {
                TallyError::Malformed(format!(
                    "log entry for skill {} has {} updates per half but {} parents",
                    entry.skill, half, n_parents
                ))
            })?
        } else {
            if half != n_parents + 1 {
                return Err(TallyError::Malformed(format!(
                    "non-negative log entry for skill {} must carry {} updates per half, got {}",
                    entry.skill,
                    n_parents + 1,
                    half
                )));
            }
            0
        };

        if position < n_child_updates {
            // Child-skill slot: proportional decrease, never below zero.
            let child = skills.child_skill_at(entry.skill, position).await?;
            let origin_key = ReputationKey::new(entry.colony, entry.skill, user);
            let target_key = ReputationKey::new(entry.colony, child, user);
            let origin_amount = policy
                .lookup_value(update_number, &origin_key, state.get(&origin_key))
                .map(|v| v.amount)
                .unwrap_or(0);
            let target_amount = policy
                .lookup_value(update_number, &target_key, state.get(&target_key))
                .map(|v| v.amount)
                .unwrap_or(0);
            let magnitude =
                proportional_amount(entry.amount.unsigned_abs(), target_amount, origin_amount);
            Ok(ResolvedDelta {
                key: target_key,
                honest_delta: -(magnitude.min(target_amount) as i128),
                origin_proof: consulted_proof(state, &origin_key)?,
                child_proof: consulted_proof(state, &target_key)?,
            })
        } else if position < n_child_updates + n_parents {
            // Parent-skill slot: full amount when gaining, proportional
            // share of the loss when losing.
            let parent = skills
                .parent_skill_at(entry.skill, position - n_child_updates)
                .await?;
            let target_key = ReputationKey::new(entry.colony, parent, user);
            if entry.amount >= 0 {
                return Ok(ResolvedDelta {
                    key: target_key,
                    honest_delta: entry.amount,
                    origin_proof: None,
                    child_proof: None,
                });
            }
            let origin_key = ReputationKey::new(entry.colony, entry.skill, user);
            let origin_amount = policy
                .lookup_value(update_number, &origin_key, state.get(&origin_key))
                .map(|v| v.amount)
                .unwrap_or(0);
            let target_amount = policy
                .lookup_value(update_number, &target_key, state.get(&target_key))
                .map(|v| v.amount)
                .unwrap_or(0);
            let magnitude =
                proportional_amount(entry.amount.unsigned_abs(), target_amount, origin_amount);
            Ok(ResolvedDelta {
                key: target_key,
                honest_delta: -(magnitude.min(target_amount) as i128),
                origin_proof: consulted_proof(state, &origin_key)?,
                child_proof: None,
            })
        } else {
            // The skill itself takes the full signed amount.
            Ok(ResolvedDelta {
                key: ReputationKey::new(entry.colony, entry.skill, user),
                honest_delta: entry.amount,
                origin_proof: None,
                child_proof: None,
            })
        }
    }
}

/// Inclusion proof of a key against the current interim state, or the
/// adjacency substitute when the key does not exist yet. `None` only while
/// the state is completely empty.
fn consulted_proof(
    state: &ReputationState,
    key: &ReputationKey,
) -> Result<Option<KeyProofMaterial>, TallyError> {
    if let Some((value, proof)) = state.key_proof(key)? {
        return Ok(Some(KeyProofMaterial {
            key: *key,
            value,
            proof,
            adjacent_for: None,
        }));
    }
    Ok(state
        .adjacent_of(key)?
        .map(|(neighbor, value, proof)| KeyProofMaterial {
            key: neighbor,
            value,
            proof,
            adjacent_for: Some(*key),
        }))
}

/// Reject structurally broken logs before touching any state: odd or
/// undersized update counts, or prefix sums that do not chain.
fn validate_log(log: &[UpdateLogEntry], previous_leaf_count: u64) -> Result<(), TallyError> {
    let mut expected_previous = previous_leaf_count;
    for (i, entry) in log.iter().enumerate() {
        if entry.n_updates < 2 || entry.n_updates % 2 != 0 {
            return Err(TallyError::Malformed(format!(
                "log entry {} has invalid update count {}",
                i, entry.n_updates
            )));
        }
        if entry.n_previous_updates != expected_previous {
            return Err(TallyError::Malformed(format!(
                "log entry {} breaks the prefix sum: expected {}, got {}",
                i, expected_previous, entry.n_previous_updates
            )));
        }
        expected_previous += entry.n_updates;
    }
    Ok(())
}
