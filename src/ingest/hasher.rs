use sha2::{Sha256, Digest};
use std::path::Path;
use crate::error::{Result, PkbError};

/// SHA256 of a byte blob as 64 lowercase hex characters
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA256 of the UTF-8 encoding of `s`. Used for chunk ids.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Compute SHA256 hash of file contents
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let content = std::fs::read(path).map_err(|source| PkbError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hash_bytes(&content))
}
