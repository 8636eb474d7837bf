//! SHA-256 content verification.
//!
//! Layer blobs are content-addressed by their manifest digest; verifying
//! the bytes on disk catches truncated or corrupted fetches before they
//! are unpacked.

use std::io::Read;
use std::path::Path;

use imagevol_common::error::{ImagevolError, Result};
use imagevol_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Digest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(ImagevolError::io_at(path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(ImagevolError::io_at(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Digest::sha256(&hex)
}

/// Validates that a file matches the expected digest.
///
/// Digests using an algorithm other than sha256 are accepted unchecked.
///
/// # Errors
///
/// Returns `ImagevolError::HashMismatch` if the hashes do not match.
pub fn validate_digest(path: &Path, expected: &Digest) -> Result<()> {
    if expected.algorithm() != "sha256" {
        tracing::debug!(digest = %expected, "skipping verification of non-sha256 digest");
        return Ok(());
    }
    tracing::debug!(path = %path.display(), digest = %expected, "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(ImagevolError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
