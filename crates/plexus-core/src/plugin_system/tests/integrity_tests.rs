#![cfg(test)]

use tempfile::tempdir;

use crate::plugin_system::error::ErrorKind;
use crate::plugin_system::integrity::{compute_digest, digest_bytes, verify};

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

#[test]
fn digest_of_known_input() {
    assert_eq!(digest_bytes(b"abc"), ABC_SHA256);
}

#[tokio::test]
async fn file_digest_matches_in_any_case() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plugin.bin");
    std::fs::write(&path, b"abc").unwrap();

    assert_eq!(compute_digest(&path).await.unwrap(), ABC_SHA256);
    verify(&path, ABC_SHA256).await.unwrap();
    verify(&path, &ABC_SHA256.to_uppercase()).await.unwrap();
}

#[tokio::test]
async fn tampered_file_is_a_security_violation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plugin.bin");
    std::fs::write(&path, b"abd").unwrap();

    let err = verify(&path, ABC_SHA256).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityViolation);
    assert!(err.to_string().contains(ABC_SHA256));
}

#[tokio::test]
async fn malformed_digest_and_missing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plugin.bin");
    std::fs::write(&path, b"abc").unwrap();

    assert_eq!(
        verify(&path, "not-hex").await.unwrap_err().kind(),
        ErrorKind::InvalidParameters
    );
    assert_eq!(verify(&path, "").await.unwrap_err().kind(), ErrorKind::InvalidParameters);
    assert_eq!(
        verify(dir.path().join("absent.bin"), ABC_SHA256)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::FileNotFound
    );
}
