//! Content checksums used for backup verification and change identity

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of some content
///
/// Returns a hex-encoded digest. Equal content always yields an equal digest.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Combined checksum over an ordered sequence of contents
///
/// Each entry is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn calculate_combined_checksum<'a>(contents: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for content in contents {
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
