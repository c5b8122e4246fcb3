// crates/tally-sync/src/config.rs
//
// Runtime configuration for the reputation miner.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use tally_core::TallyError;
use tally_trie::BackendKind;

/// Runtime configuration for the miner process.
#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// Directory for local data storage (RocksDB, caches).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Trie backend: "incremental" or "reference".
    #[serde(default = "default_trie_backend")]
    pub trie_backend: String,

    /// Persist every state produced while replaying checkpoints, not just
    /// the final one.
    #[serde(default)]
    pub persist_interim_states: bool,

    /// File the justification trie is cached to between restarts.
    #[serde(default = "default_justification_cache")]
    pub justification_cache: String,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> String {
    "~/.tally/data".to_string()
}

fn default_trie_backend() -> String {
    "incremental".to_string()
}

fn default_justification_cache() -> String {
    "~/.tally/justification.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            trie_backend: default_trie_backend(),
            persist_interim_states: false,
            justification_cache: default_justification_cache(),
            log_level: default_log_level(),
        }
    }
}

impl MinerConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: MinerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The configured trie backend.
    pub fn backend_kind(&self) -> Result<BackendKind, TallyError> {
        match self.trie_backend.as_str() {
            "incremental" => Ok(BackendKind::Incremental),
            "reference" => Ok(BackendKind::Reference),
            other => Err(TallyError::Malformed(format!(
                "unknown trie backend '{}'",
                other
            ))),
        }
    }
}
