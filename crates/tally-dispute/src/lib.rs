// crates/tally-dispute/src/lib.rs
//
// tally-dispute: the challenge game for the Tally Protocol.
//
// Drives one submission through the arbiter's bracket: submit, confirm the
// justification root, narrow the disagreement by binary search, and defend
// the single disputed update with a fully revalidated proof bundle.

pub mod arbiter;
pub mod engine;

pub use arbiter::{
    BinarySearchStep, ChallengeResponse, DisputeSubmission, EntryProofSubmission,
    ReputationArbiter, FALLBACK_GAS_LIMIT,
};
pub use engine::{DisputeEngine, DisputePhase};
