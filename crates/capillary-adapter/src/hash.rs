use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
///
/// Used as the on-disk file name of a cache entry, so the output must stay
/// free of path separators: lowercase hex only.
pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
