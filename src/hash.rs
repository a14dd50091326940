//! Streaming SHA-256 content hashing.
//!
//! Hashing is the sole authority for both staleness decisions and
//! post-download verification, so it must handle arbitrarily large files
//! without loading them into memory.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read buffer size for hashing (64 KiB).
///
/// Purely a throughput knob: any chunk size yields the same digest.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Error hashing a file. Always identifies the offending path.
#[derive(Debug, Error)]
#[error("failed to hash {path}: {source}")]
pub struct HashError {
    /// The file that could not be hashed.
    pub path: PathBuf,
    /// The underlying IO error.
    #[source]
    pub source: std::io::Error,
}

impl HashError {
    fn new(path: &Path, source: std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Computes the lowercase hex SHA-256 digest of a file's contents.
///
/// # Errors
///
/// Returns [`HashError`] if the file cannot be opened or a read fails
/// mid-stream.
pub async fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).await.map_err(|e| HashError::new(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .await
            .map_err(|e| HashError::new(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
