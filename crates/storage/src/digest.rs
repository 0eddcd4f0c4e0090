use phishnet_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Lowercase hex SHA-256.
pub struct Sha256Digest;

impl Sha256Digest {
    /// Digest of the file as it is on disk now.
    pub fn compute_file(path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(Self::compute(&bytes))
    }

    pub fn compute(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
        let actual = Self::compute_file(path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::Validation(format!(
                "SHA256 mismatch for {}: expected {}, got {}",
                path.display(),
                expected,
                actual
            )));
        }
        Ok(())
    }
}
