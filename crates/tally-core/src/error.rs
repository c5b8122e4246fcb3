use thiserror::Error;

/// Protocol-wide error types for the Tally Protocol.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Malformed input (wrong-width keys/values, unparseable log entries).
    /// Rejected before any state is touched, never partially applied.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Requested key or state is not present. Distinct from malformed input
    /// so callers can fall back (e.g. to the durable store).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Locally computed material diverges from previously recorded material.
    /// Recoverable during sync, fatal during dispute-response assembly.
    #[error("Consistency failure: {0}")]
    Consistency(String),

    /// Operation attempted from the wrong phase of a state machine.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage layer error (RocksDB, cache files).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// External call failure (RPC, contract revert). The revert reason is
    /// carried unchanged so callers can apply their own retry policy.
    #[error("External call failed: {0}")]
    External(String),
}

impl From<serde_json::Error> for TallyError {
    fn from(e: serde_json::Error) -> Self {
        TallyError::Serialization(e.to_string())
    }
}
