// crates/tally-engine/src/policy.rs
//
// Replay deviation points as a capability interface. The default methods
// are the honest behavior; dispute tests implement the same trait to build
// miners that corrupt a single replay step.

use tally_core::{ReputationKey, ReputationValue};

/// Hooks into the two places a replay step can deviate: the delta applied
/// for an update, and the value read for a consulted key.
pub trait ReplayPolicy: Send + Sync {
    /// The signed delta applied for one update. `honest` is the correctly
    /// derived value.
    fn delta_for_update(&self, update_number: u64, key: &ReputationKey, honest: i128) -> i128 {
        let _ = (update_number, key);
        honest
    }

    /// The value read for a consulted key (origin, child, or decay target).
    fn lookup_value(
        &self,
        update_number: u64,
        key: &ReputationKey,
        honest: Option<ReputationValue>,
    ) -> Option<ReputationValue> {
        let _ = (update_number, key);
        honest
    }
}

/// The honest policy: every hook returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct HonestPolicy;

impl ReplayPolicy for HonestPolicy {}
