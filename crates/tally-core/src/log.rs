// crates/tally-core/src/log.rs
//
// The on-chain reputation update log as seen by the replayer, and the
// prefix-sum arithmetic that maps a global update number to its owning
// log entry.

use serde::{Deserialize, Serialize};

use crate::crypto::Digest;
use crate::error::TallyError;
use crate::reputation::{Address, DecayRate, SkillId};

/// One colony-level reputation action from the external update log.
///
/// Each entry expands into `n_updates` individual deltas during replay:
/// the first half colony-wide, the second half user-specific, and within
/// each half child skills, then parent skills, then the skill itself.
/// `n_previous_updates` is the prefix sum of all updates before this entry,
/// including the decay updates of the previous state's leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub user: Address,
    pub amount: i128,
    pub skill: SkillId,
    pub colony: Address,
    pub n_updates: u64,
    pub n_previous_updates: u64,
}

/// Locate the log entry owning a global update number by binary search over
/// the `n_previous_updates` prefix sums.
///
/// The caller has already peeled off decay updates, so `update_number` is
/// expected to fall inside some entry's range; anything else is a malformed
/// log.
pub fn owning_entry_index(
    entries: &[UpdateLogEntry],
    update_number: u64,
) -> Result<usize, TallyError> {
    if entries.is_empty() {
        return Err(TallyError::Malformed(format!(
            "update {} has no owning log entry: log is empty",
            update_number
        )));
    }
    // partition_point finds the first entry starting after update_number;
    // the owner is the one before it.
    let idx = entries.partition_point(|e| e.n_previous_updates <= update_number);
    if idx == 0 {
        return Err(TallyError::Malformed(format!(
            "update {} precedes the first log entry (starts at {})",
            update_number, entries[0].n_previous_updates
        )));
    }
    let owner = idx - 1;
    let entry = &entries[owner];
    if update_number >= entry.n_previous_updates + entry.n_updates {
        return Err(TallyError::Malformed(format!(
            "update {} falls in a gap after log entry {}",
            update_number, owner
        )));
    }
    Ok(owner)
}

/// One "cycle complete" checkpoint observed on-chain: the accepted state
/// identity plus the constants that governed that cycle's replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cycle: u64,
    pub root: Digest,
    pub leaf_count: u64,
    pub decay: DecayRate,
}
