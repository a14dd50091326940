//! Update orchestration: diff the remote manifest against local state and
//! drive the download engine for every stale file.
//!
//! The orchestrator fetches the manifest, classifies each entry as fresh
//! or stale by content hash (never by timestamps or progress records),
//! downloads stale files under a whole-file concurrency cap, re-verifies
//! everything it touched, sweeps aged progress records, and returns a
//! [`StatusReport`]. Per-file failures never abort the batch; only an
//! unreachable manifest fails the run.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::download::{
    DownloadError, DownloadOptions, HttpClient, ProgressCallback, ProgressEvent,
    SegmentedDownloader,
};
use crate::hash::hash_file;
use crate::manifest::{ManifestEntry, parse_manifest};
use crate::progress::sweep_progress_records;

/// Error that fails an entire update run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The manifest document could not be fetched. Nothing can proceed
    /// without it.
    #[error("failed to fetch manifest from {url}: {source}")]
    ManifestFetch {
        /// The manifest URL.
        url: String,
        /// The underlying fetch failure.
        #[source]
        source: DownloadError,
    },
}

/// Post-download verification outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Files whose re-computed hash matched the manifest.
    pub verified: Vec<String>,
    /// Files whose re-computed hash did not match (or were unreadable).
    pub corrupted: Vec<String>,
}

/// Structured account of one update run. The only data handed to
/// presentation layers; serializable for the control-plane boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Files downloaded (or re-downloaded) this run.
    pub updated: Vec<String>,
    /// Files already matching the manifest.
    pub skipped: Vec<String>,
    /// Files that could not be brought up to date, plus malformed
    /// manifest lines.
    pub failed: Vec<String>,
    /// Re-hash results for everything in `updated`.
    pub verification: VerificationReport,
}

/// Callback receiving per-file [`ProgressEvent`]s, tagged with the
/// manifest-relative path.
pub type SyncProgressCallback = Arc<dyn Fn(&str, ProgressEvent) + Send + Sync>;

/// How one file's sync attempt ended.
enum FileOutcome {
    Updated,
    Skipped,
    Failed,
}

/// Drives one or more update runs against a fixed configuration.
pub struct Updater {
    config: SyncConfig,
    client: HttpClient,
    downloader: SegmentedDownloader,
    cancel: CancellationToken,
    on_progress: Option<SyncProgressCallback>,
}

impl Updater {
    /// Creates an updater, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is rejected.
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let options = config.download_options();
        let client = HttpClient::with_timeouts(
            std::time::Duration::from_secs(crate::download::constants::CONNECT_TIMEOUT_SECS),
            options.timeout,
        );
        let cancel = CancellationToken::new();
        let downloader =
            SegmentedDownloader::new(client.clone()).with_cancellation(cancel.clone());
        Ok(Self {
            config,
            client,
            downloader,
            cancel,
            on_progress: None,
        })
    }

    /// Attaches a cancellation token shared with the caller. Cancelling it
    /// stops new file and segment tasks and abandons in-flight requests.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.downloader = self.downloader.clone().with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Attaches a progress callback receiving `(relative_path, event)`.
    #[must_use]
    pub fn with_progress(mut self, on_progress: SyncProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Overrides the engine's backoff schedule. Intended for tests and
    /// operators tuning retry pressure.
    #[must_use]
    pub fn with_backoff(mut self, backoff: crate::download::RetryPolicy) -> Self {
        self.downloader = self.downloader.clone().with_backoff(backoff);
        self
    }

    /// Runs one update: fetch manifest, reconcile every entry, verify,
    /// sweep, report.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ManifestFetch`] when the manifest is
    /// unreachable; every other failure is recorded in the report.
    #[instrument(skip(self), fields(manifest = %self.config.manifest_url))]
    pub async fn update(&self) -> Result<StatusReport, SyncError> {
        let manifest_text = self
            .client
            .fetch_text(&self.config.manifest_url)
            .await
            .map_err(|source| SyncError::ManifestFetch {
                url: self.config.manifest_url.clone(),
                source,
            })?;

        let parsed = parse_manifest(&manifest_text);
        info!(
            entries = parsed.entries.len(),
            malformed = parsed.malformed.len(),
            "manifest fetched"
        );

        let mut report = StatusReport::default();
        report.failed.extend(parsed.malformed.iter().cloned());

        let expected_hashes: HashMap<String, String> = parsed
            .entries
            .iter()
            .map(|entry| (entry.relative_path.clone(), entry.expected_hash.clone()))
            .collect();

        let outcomes = self.reconcile_entries(parsed.entries).await;
        for (relative_path, outcome) in outcomes {
            match outcome {
                FileOutcome::Updated => report.updated.push(relative_path),
                FileOutcome::Skipped => report.skipped.push(relative_path),
                FileOutcome::Failed => report.failed.push(relative_path),
            }
        }

        report.verification = self.verify_updated(&report.updated, &expected_hashes).await;

        sweep_progress_records(&self.config.target_dir, self.config.progress_max_age).await;

        info!(
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            corrupted = report.verification.corrupted.len(),
            "update run complete"
        );
        Ok(report)
    }

    /// Fans each entry out under the whole-file concurrency gate and
    /// collects per-file outcomes in manifest order.
    async fn reconcile_entries(
        &self,
        entries: Vec<ManifestEntry>,
    ) -> Vec<(String, FileOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let options = Arc::new(self.config.download_options());
        let mut handles = Vec::new();
        let mut outcomes = Vec::new();

        for entry in entries {
            let relative_path = entry.relative_path.clone();

            if self.cancel.is_cancelled() {
                debug!(path = %relative_path, "cancelled before dispatch");
                outcomes.push((relative_path, FileOutcome::Failed));
                continue;
            }

            let Some(destination) =
                resolve_destination(&self.config.target_dir, &entry.relative_path)
            else {
                warn!(path = %relative_path, "manifest path escapes the target directory");
                outcomes.push((relative_path, FileOutcome::Failed));
                continue;
            };

            let file_url = match join_file_url(&self.config.server_url, &entry.relative_path) {
                Ok(url) => url,
                Err(error) => {
                    warn!(path = %relative_path, %error, "could not build file URL");
                    outcomes.push((relative_path, FileOutcome::Failed));
                    continue;
                }
            };

            // Blocks while the gate is full, so dispatch order is manifest
            // order even though completions interleave.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                outcomes.push((relative_path, FileOutcome::Failed));
                continue;
            };

            let downloader = self.downloader.clone();
            let options = Arc::clone(&options);
            let on_progress = self.per_file_callback(&relative_path);
            let expected_hash = entry.expected_hash;
            let task_path = relative_path.clone();

            handles.push((
                relative_path,
                tokio::spawn(async move {
                    let _permit = permit;
                    sync_one_file(
                        &downloader,
                        &file_url,
                        &destination,
                        &expected_hash,
                        &options,
                        on_progress,
                        &task_path,
                    )
                    .await
                }),
            ));
        }

        for (relative_path, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    warn!(path = %relative_path, error = %join_error, "file task panicked");
                    FileOutcome::Failed
                }
            };
            outcomes.push((relative_path, outcome));
        }

        outcomes
    }

    /// Re-hashes every file updated this run against the manifest.
    async fn verify_updated(
        &self,
        updated: &[String],
        expected_hashes: &HashMap<String, String>,
    ) -> VerificationReport {
        let mut verification = VerificationReport::default();

        for relative_path in updated {
            let Some(expected) = expected_hashes.get(relative_path) else {
                continue;
            };
            let Some(destination) = resolve_destination(&self.config.target_dir, relative_path)
            else {
                continue;
            };

            match hash_file(&destination).await {
                Ok(actual) if &actual == expected => {
                    debug!(path = %relative_path, "integrity verified");
                    verification.verified.push(relative_path.clone());
                }
                Ok(_) => {
                    warn!(path = %relative_path, "integrity check failed");
                    verification.corrupted.push(relative_path.clone());
                }
                Err(error) => {
                    warn!(path = %relative_path, %error, "could not re-hash updated file");
                    verification.corrupted.push(relative_path.clone());
                }
            }
        }

        verification
    }

    /// Wraps the run-wide callback into a per-file one tagged with the
    /// relative path.
    fn per_file_callback(&self, relative_path: &str) -> Option<ProgressCallback> {
        self.on_progress.as_ref().map(|outer| {
            let outer = Arc::clone(outer);
            let relative_path = relative_path.to_string();
            let callback: ProgressCallback =
                Arc::new(move |event| outer(&relative_path, event));
            callback
        })
    }
}

/// Checks staleness and downloads when needed. All failures collapse to
/// [`FileOutcome::Failed`]; details are logged by the engine.
async fn sync_one_file(
    downloader: &SegmentedDownloader,
    file_url: &str,
    destination: &Path,
    expected_hash: &str,
    options: &DownloadOptions,
    on_progress: Option<ProgressCallback>,
    relative_path: &str,
) -> FileOutcome {
    if !file_is_stale(destination, expected_hash).await {
        info!(path = %relative_path, "file is up to date, skipping");
        return FileOutcome::Skipped;
    }

    match downloader
        .fetch(file_url, destination, expected_hash, options, on_progress)
        .await
    {
        Ok(_) => {
            info!(path = %relative_path, "file updated");
            FileOutcome::Updated
        }
        Err(error) => {
            warn!(path = %relative_path, %error, "file update failed");
            FileOutcome::Failed
        }
    }
}

/// A file is stale when it is absent or its hash differs from the
/// manifest's. Hash comparison is the sole authority; progress records
/// are never consulted here. An unreadable file counts as stale so the
/// download path can replace it.
async fn file_is_stale(destination: &Path, expected_hash: &str) -> bool {
    match hash_file(destination).await {
        Ok(actual) => actual != expected_hash,
        Err(_) => true,
    }
}

/// Joins the server base with a manifest-relative path.
fn join_file_url(server_url: &str, relative_path: &str) -> Result<String, url::ParseError> {
    let base = url::Url::parse(server_url)?;
    Ok(base.join(relative_path)?.to_string())
}

/// Resolves a manifest path under the target directory, rejecting
/// anything that would escape it (absolute paths, `..`, or non-normal
/// components).
fn resolve_destination(target_dir: &Path, relative_path: &str) -> Option<PathBuf> {
    let relative = Path::new(relative_path);
    if relative.as_os_str().is_empty() {
        return None;
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(target_dir.join(relative))
}
