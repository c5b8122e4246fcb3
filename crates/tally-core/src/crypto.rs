// crates/tally-core/src/crypto.rs

use sha2::{Digest as _, Sha256};

/// A 32-byte SHA-256 digest. Used for trie roots, node hashes, and key paths.
pub type Digest = [u8; 32];

/// The all-zero digest. Root of an empty trie.
pub const ZERO_DIGEST: Digest = [0u8; 32];

/// Compute SHA-256 hash of the given bytes.
///
/// Returns a 32-byte hash.
pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute SHA-256 over the concatenation of several byte slices.
pub fn hash_concat(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Abbreviated hex form of a digest for log lines.
pub fn short_hex(digest: &Digest) -> String {
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_deterministic() {
        let a = hash_bytes(b"tally protocol");
        let b = hash_bytes(b"tally protocol");
        assert_eq!(a, b);
        assert_ne!(a, hash_bytes(b"different"));
    }

    #[test]
    fn test_hash_concat_matches_joined() {
        let joined = hash_bytes(b"ab");
        let parts = hash_concat(&[b"a", b"b"]);
        assert_eq!(joined, parts);
    }
}
