// crates/tally-engine/src/lib.rs
//
// tally-engine: Reputation state and log replay for the Tally Protocol.
//
// Owns the two live reputation states, expands on-chain update logs into
// individual deltas (decay, skill-tree propagation), and records the
// justification trail the dispute engine later defends.

pub mod justification;
pub mod policy;
pub mod replay;
pub mod skills;
pub mod state;

pub use justification::{
    index_key, JustificationEntry, JustificationSnapshot, JustificationTrie, KeyProofMaterial,
    UpdateRecord, ENCODED_SNAPSHOT_LEN,
};
pub use policy::{HonestPolicy, ReplayPolicy};
pub use replay::{ReplayOutcome, Replayer};
pub use skills::InMemorySkillTree;
pub use state::ReputationState;
