//! Explicit configuration for the orchestrator and download engine.
//!
//! There is no ambient global state: callers construct a [`SyncConfig`],
//! validate it, and hand it to [`crate::sync::Updater`]. The CLI layer is
//! responsible for merging flags and file config into this value.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::{DEFAULT_RETRY_COUNT, DEFAULT_SEGMENT_COUNT, DownloadOptions};
use crate::download::constants::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Default number of whole files downloading at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default age after which stale progress records are swept (1 day).
pub const DEFAULT_PROGRESS_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Maximum allowed whole-file concurrency.
const MAX_CONCURRENCY: usize = 100;

/// Maximum allowed segment hint.
const MAX_SEGMENT_HINT: usize = 64;

/// Configuration error. Fatal at startup; never produced mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric or string field failed validation.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A URL field could not be parsed.
    #[error("invalid URL `{url}`: {source}")]
    Url {
        /// The rejected URL.
        url: String,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },
}

/// Everything one update run needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL the manifest's relative paths are served under. A
    /// trailing `/` is appended if missing so URL joins stay inside it.
    pub server_url: String,
    /// Full URL of the manifest document.
    pub manifest_url: String,
    /// Local directory kept in sync.
    pub target_dir: PathBuf,
    /// Whole files downloading at once (1..=100).
    pub concurrency: usize,
    /// Total attempts per file, including the first.
    pub retry_count: u32,
    /// Total per-request timeout.
    pub request_timeout: Duration,
    /// Upper bound on concurrent segments per file (1..=64).
    pub segment_count_hint: usize,
    /// Throughput cap in bytes per second; 0 disables throttling.
    pub speed_limit_bytes_per_sec: u64,
    /// Progress records older than this are swept after a run.
    pub progress_max_age: Duration,
}

impl SyncConfig {
    /// Creates a config with defaults for everything but the endpoints.
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        manifest_url: impl Into<String>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut server_url = server_url.into();
        if !server_url.ends_with('/') {
            server_url.push('/');
        }
        Self {
            server_url,
            manifest_url: manifest_url.into(),
            target_dir: target_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            retry_count: DEFAULT_RETRY_COUNT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            segment_count_hint: DEFAULT_SEGMENT_COUNT,
            speed_limit_bytes_per_sec: 0,
            progress_max_age: DEFAULT_PROGRESS_MAX_AGE,
        }
    }

    /// Validates field ranges and URL syntax.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first rejected field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: format!("{} not in 1..={MAX_CONCURRENCY}", self.concurrency),
            });
        }
        if self.retry_count == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_SEGMENT_HINT).contains(&self.segment_count_hint) {
            return Err(ConfigError::Invalid {
                field: "segment_count_hint",
                reason: format!("{} not in 1..={MAX_SEGMENT_HINT}", self.segment_count_hint),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: "must be non-zero".to_string(),
            });
        }

        for value in [&self.server_url, &self.manifest_url] {
            url::Url::parse(value).map_err(|source| ConfigError::Url {
                url: value.clone(),
                source,
            })?;
        }

        Ok(())
    }

    /// The per-file download options this config implies.
    #[must_use]
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            retry_count: self.retry_count,
            timeout: self.request_timeout,
            segment_count_hint: self.segment_count_hint,
            speed_limit_bytes_per_sec: self.speed_limit_bytes_per_sec,
        }
    }
}
