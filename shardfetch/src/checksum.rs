//! File digest verification.
//!
//! After a download completes, the destination can be checked against a
//! user-supplied digest. The file is streamed through the selected hash so
//! arbitrarily large downloads verify in constant memory.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{FetchError, FetchResult};

/// Read buffer size for checksum calculation (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithms supported for post-download verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unsupported digest algorithm: {}", other)),
        }
    }
}

/// Compute the digest of a file as a lowercase hex string.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> FetchResult<String> {
    match algorithm {
        ChecksumAlgorithm::Md5 => hash_file::<Md5>(path),
        ChecksumAlgorithm::Sha1 => hash_file::<Sha1>(path),
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path),
    }
}

/// Verify a file against an expected digest.
///
/// The comparison is case-insensitive on the expected value. Returns `true`
/// when the digests match.
pub fn verify_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    expected: &str,
) -> FetchResult<bool> {
    let actual = file_digest(path, algorithm)?;
    let expected = expected.to_ascii_lowercase();
    debug!(%actual, %expected, "comparing file digest");
    Ok(actual == expected)
}

fn hash_file<D: Digest>(path: &Path) -> FetchResult<String> {
    let mut file = File::open(path).map_err(|e| FetchError::io(path, e))?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| FetchError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_fixture(temp: &TempDir, content: &[u8]) -> std::path::PathBuf {
        let path = temp.path().join("fixture.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_sha256_digest() {
        let temp = TempDir::new().unwrap();
        let path = write_fixture(&temp, b"hello world");

        let digest = file_digest(&path, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha1_digest() {
        let temp = TempDir::new().unwrap();
        let path = write_fixture(&temp, b"hello world");

        let digest = file_digest(&path, ChecksumAlgorithm::Sha1).unwrap();
        assert_eq!(digest, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_md5_digest() {
        let temp = TempDir::new().unwrap();
        let path = write_fixture(&temp, b"hello world");

        let digest = file_digest(&path, ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_verify_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let path = write_fixture(&temp, b"hello world");

        let ok = verify_file(
            &path,
            ChecksumAlgorithm::Md5,
            "5EB63BBBE01EEED093CB22BB8F5ACDC3",
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_verify_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = write_fixture(&temp, b"hello world");

        let ok = verify_file(&path, ChecksumAlgorithm::Sha256, "deadbeef").unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_verify_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.bin");

        let result = verify_file(&path, ChecksumAlgorithm::Sha256, "00");
        assert!(matches!(result, Err(FetchError::Io { .. })));
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(
            "MD5".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Md5
        );
        assert_eq!(
            "sha-1".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha1
        );
        assert_eq!(
            "Sha256".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha256
        );
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }
}
