//! Checksum utilities for stored content

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
