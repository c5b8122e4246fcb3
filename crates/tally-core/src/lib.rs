// crates/tally-core/src/lib.rs
//
// tally-core: Core types, reputation codec, arithmetic, and trait interfaces
// for the Tally Protocol.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the domain key/value wire formats, the delta and decay
// arithmetic, the protocol-wide error type, and the trait seams behind which
// the on-chain collaborators (update log, skill hierarchy, checkpoints,
// durable store) live.

pub mod crypto;
pub mod error;
pub mod log;
pub mod reputation;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use tally_core::ReputationKey;`

// Crypto primitives
pub use crypto::{hash_bytes, hash_concat, short_hex, Digest, ZERO_DIGEST};

// Reputation codec
pub use reputation::{
    apply_delta, decay_amount, proportional_amount, Address, DecayRate, ReputationKey,
    ReputationValue, SkillId, ENCODED_KEY_LEN, ENCODED_VALUE_LEN, MAX_AMOUNT,
};

// Update log
pub use log::{owning_entry_index, Checkpoint, UpdateLogEntry};

// Error type
pub use error::TallyError;

// Traits
pub use traits::{CheckpointSource, SkillHierarchy, SnapshotStore, UpdateLogSource};
