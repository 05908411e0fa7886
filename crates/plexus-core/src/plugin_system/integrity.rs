//! SHA-256 integrity checks for plugin files.
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::plugin_system::error::{PluginSystemError, Result};

/// Lowercase hex SHA-256 of the file's contents.
pub async fn compute_digest(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        IoErrorKind::NotFound => PluginSystemError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => PluginSystemError::SecurityViolation {
            subject: path.display().to_string(),
            message: format!("file could not be read for hashing: {}", e),
        },
    })?;
    Ok(digest_bytes(&bytes))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fails with `SecurityViolation` unless the file hashes to `expected` (hex, any case).
pub async fn verify(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let expected = expected.trim();
    if expected.is_empty() || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PluginSystemError::InvalidParameters {
            message: format!("'{}' is not a hex digest", expected),
        });
    }

    let actual = compute_digest(path).await?;
    if !actual.eq_ignore_ascii_case(expected) {
        warn!("Integrity check failed for {}", path.display());
        return Err(PluginSystemError::SecurityViolation {
            subject: path.display().to_string(),
            message: format!("digest mismatch: expected {}, found {}", expected.to_lowercase(), actual),
        });
    }
    debug!("Integrity check passed for {}", path.display());
    Ok(())
}
