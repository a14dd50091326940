//! Error types for the download module.
//!
//! Every variant carries enough context (URL, path, segment index) to be
//! actionable in logs without a backtrace. All variants except
//! [`DownloadError::Cancelled`] are retryable within one file's attempt
//! budget.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching one file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The size probe could not determine the remote file's total size.
    #[error("could not determine total size of {url}")]
    SizeUnknown {
        /// The URL that was probed.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, mid-body drop).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A byte-range segment request was answered in a way the engine
    /// cannot honor (e.g. a full-body 200 for a mid-file range).
    #[error("segment {index} of {url} failed: {reason}")]
    SegmentFetch {
        /// The URL being fetched.
        url: String,
        /// Zero-based segment index.
        index: usize,
        /// What went wrong.
        reason: String,
    },

    /// The assembled file's hash did not match the manifest hash.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The assembled destination.
        path: PathBuf,
        /// Hash the manifest promised.
        expected: String,
        /// Hash actually computed.
        actual: String,
    },

    /// A part file expected during assembly was absent.
    #[error("missing part file {path}")]
    MissingPart {
        /// The absent part file.
        path: PathBuf,
    },

    /// File system error (create, write, rename, remove).
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download was cancelled by a shutdown signal. Never retried.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates a size-probe failure.
    pub fn size_unknown(url: impl Into<String>) -> Self {
        Self::SizeUnknown { url: url.into() }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a segment fetch error.
    pub fn segment_fetch(url: impl Into<String>, index: usize, reason: impl Into<String>) -> Self {
        Self::SegmentFetch {
            url: url.into(),
            index,
            reason: reason.into(),
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a missing part error.
    pub fn missing_part(path: impl Into<PathBuf>) -> Self {
        Self::MissingPart { path: path.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because the variants require context (url, path,
// index) that the source errors don't provide. The helper constructors are
// the correct pattern here.
