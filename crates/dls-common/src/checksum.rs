//! Checksum utilities for downloaded documents and cache keys

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 of any readable source as lowercase hex
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 of a file
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Stable file name for a download cache key.
///
/// Cache keys are free-form (`provider/dataset/part`), so they are hashed
/// rather than used as paths directly.
pub fn cache_key_digest(cache_key: &str) -> String {
    hex::encode(Sha256::digest(cache_key.as_bytes()))
}
