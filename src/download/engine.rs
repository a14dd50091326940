//! Segmented download engine: one file, N concurrent byte-range segments.
//!
//! The engine downloads a single remote file by splitting it into
//! contiguous byte ranges fetched concurrently into `.part<N>` files,
//! assembling the parts in index order, and verifying the result against
//! the expected content hash. Failed attempts back off exponentially and
//! retry up to the configured budget; partial progress is checkpointed
//! through the progress store so an interrupted run can resume.
//!
//! # Concurrency Model
//!
//! - Each segment runs in its own task inside a [`JoinSet`], so every
//!   spawned task is joined or aborted before `fetch` returns, including
//!   on error paths
//! - Segment completion order is unspecified; assembly is strictly ordered
//!   by segment index
//! - Per-file byte progress is serialized through a mutex-guarded gauge so
//!   callback values never decrease within one attempt

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hash::hash_file;
use crate::progress::{load_progress, remove_progress, save_progress};

use super::client::HttpClient;
use super::constants::{
    ASSEMBLY_BUFFER_SIZE, CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, TRANSFER_CHUNK_SIZE,
};
use super::error::DownloadError;
use super::retry::{RetryDecision, RetryPolicy};
use super::segment::{SegmentDescriptor, plan_segment_count, plan_segments};

/// Default upper bound on concurrent segments per file.
pub const DEFAULT_SEGMENT_COUNT: usize = 4;

/// Tagged progress signal delivered to collaborators (GUI, CLI, API).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Bytes landed so far out of the total. Within one download attempt
    /// `current` never decreases.
    Progress {
        /// Bytes accounted for so far (including any resumed prefix).
        current: u64,
        /// Total size of the file.
        total: u64,
    },
    /// The file was downloaded (or already matched) and verified.
    Completed,
    /// The file failed terminally after exhausting retries.
    Failed {
        /// Human-readable failure description.
        reason: String,
    },
}

/// Shared callback invoked with [`ProgressEvent`]s for one file.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-fetch tuning knobs.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Total attempts per file, including the first (clamped to >= 1).
    pub retry_count: u32,
    /// Total per-request timeout, applied when the engine (or orchestrator)
    /// builds its HTTP client via [`SegmentedDownloader::from_options`].
    pub timeout: Duration,
    /// Upper bound on concurrent segments per file.
    pub segment_count_hint: usize,
    /// Throughput cap in bytes per second; 0 disables throttling.
    pub speed_limit_bytes_per_sec: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            retry_count: super::retry::DEFAULT_RETRY_COUNT,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            segment_count_hint: DEFAULT_SEGMENT_COUNT,
            speed_limit_bytes_per_sec: 0,
        }
    }
}

/// Outcome of a successful [`SegmentedDownloader::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination already matched the expected hash; no network calls
    /// were made.
    AlreadyComplete,
    /// The file was downloaded and verified.
    Downloaded {
        /// Total size of the file in bytes.
        bytes: u64,
    },
}

/// Downloads one file at a time as concurrent byte-range segments.
///
/// Cheap to clone; clones share the underlying HTTP connection pool and
/// cancellation token.
#[derive(Debug, Clone)]
pub struct SegmentedDownloader {
    client: HttpClient,
    backoff: RetryPolicy,
    cancel: CancellationToken,
}

impl SegmentedDownloader {
    /// Creates an engine over an existing HTTP client.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            backoff: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an engine with an HTTP client derived from `options`
    /// (default connect timeout, `options.timeout` total per request).
    #[must_use]
    pub fn from_options(options: &DownloadOptions) -> Self {
        Self::new(HttpClient::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            options.timeout,
        ))
    }

    /// Attaches a cancellation token. Cancelling it stops new segment
    /// tasks, abandons in-flight requests, and fails the fetch with
    /// [`DownloadError::Cancelled`] without touching the destination.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Overrides the backoff schedule (delays, multiplier, cap). The
    /// per-fetch attempt budget still comes from [`DownloadOptions`].
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fetches `url` into `destination`, verifying against `expected_hash`.
    ///
    /// Reports completion immediately (zero network calls) when the
    /// destination already matches. Otherwise probes the size, plans
    /// segments, resumes from any valid progress record, downloads all
    /// segments concurrently, assembles and verifies, retrying the whole
    /// attempt with exponential backoff on any failure.
    ///
    /// On terminal failure the callback receives one
    /// [`ProgressEvent::Failed`] and no `.part*` files remain.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`] once the retry budget is
    /// exhausted, or [`DownloadError::Cancelled`] immediately on shutdown.
    #[instrument(skip(self, options, on_progress, expected_hash), fields(url = %url, destination = %destination.display()))]
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        expected_hash: &str,
        options: &DownloadOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Result<FetchOutcome, DownloadError> {
        // Step 1: an up-to-date destination needs no network at all.
        if let Ok(metadata) = fs::metadata(destination).await {
            if let Ok(actual) = hash_file(destination).await {
                if actual == expected_hash {
                    debug!("destination already matches expected hash");
                    emit(
                        on_progress.as_ref(),
                        ProgressEvent::Progress {
                            current: metadata.len(),
                            total: metadata.len(),
                        },
                    );
                    emit(on_progress.as_ref(), ProgressEvent::Completed);
                    return Ok(FetchOutcome::AlreadyComplete);
                }
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let policy = self.backoff.for_attempts(options.retry_count);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempting download");

            let result = if self.cancel.is_cancelled() {
                Err(DownloadError::Cancelled)
            } else {
                self.attempt_fetch(url, destination, expected_hash, options, on_progress.as_ref())
                    .await
            };

            match result {
                Ok(total) => {
                    // Persist final progress, then drop the record: success
                    // means there is nothing left to resume.
                    save_progress(destination, total).await;
                    remove_progress(destination).await;
                    emit(
                        on_progress.as_ref(),
                        ProgressEvent::Progress {
                            current: total,
                            total,
                        },
                    );
                    emit(on_progress.as_ref(), ProgressEvent::Completed);
                    info!(bytes = total, "file downloaded and verified");
                    return Ok(FetchOutcome::Downloaded { bytes: total });
                }
                Err(error) => match policy.should_retry(&error, attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        info!(
                            %error,
                            next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            "retrying download"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(%error, attempt, %reason, "download failed terminally");
                        emit(
                            on_progress.as_ref(),
                            ProgressEvent::Failed {
                                reason: error.to_string(),
                            },
                        );
                        return Err(error);
                    }
                },
            }
        }
    }

    /// One full download attempt: probe, plan, fetch segments, assemble,
    /// verify. Returns the file's total size on success.
    async fn attempt_fetch(
        &self,
        url: &str,
        destination: &Path,
        expected_hash: &str,
        options: &DownloadOptions,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<u64, DownloadError> {
        // Step 2: size probe.
        let probe = self.client.probe_size(url).await?;
        let total = probe.total_size;

        // Step 4: resume only from a validated offset.
        let resume_base = resolve_resume_offset(destination, total, probe.accepts_ranges).await;

        // Step 3: adaptive segment plan over the remaining span. A server
        // that does not honor ranges can only serve one full-body segment.
        let count = if probe.accepts_ranges {
            plan_segment_count(total - resume_base, options.segment_count_hint)
        } else {
            1
        };
        let segments = plan_segments(resume_base, total, count);
        debug!(
            total,
            resume_base,
            segments = segments.len(),
            "planned segmented download"
        );

        let throttle = throttle_interval(options.speed_limit_bytes_per_sec);
        let gauge = Arc::new(ByteGauge::new(resume_base, total, on_progress.cloned()));

        // Step 5: all segments in flight at once, each owning its part file.
        let mut tasks: JoinSet<Result<(), DownloadError>> = JoinSet::new();
        for segment in &segments {
            let client = self.client.clone();
            let url = url.to_string();
            let part = part_path(destination, segment.index);
            let segment = *segment;
            let gauge = Arc::clone(&gauge);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => Err(DownloadError::Cancelled),
                    result = client.fetch_segment(&url, &segment, &part, throttle, |len| {
                        gauge.advance(len);
                    }) => result.map(|_| ()),
                }
            });
        }

        // Step 6: first failure wins; everything else is torn down.
        let mut first_failure: Option<DownloadError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if first_failure.is_none() {
                        first_failure = Some(error);
                        tasks.abort_all();
                    }
                }
                Err(join_error) => {
                    if !join_error.is_cancelled() && first_failure.is_none() {
                        first_failure = Some(DownloadError::segment_fetch(
                            url,
                            0,
                            format!("segment task panicked: {join_error}"),
                        ));
                        tasks.abort_all();
                    }
                }
            }
        }

        if let Some(error) = first_failure {
            remove_part_files(destination, segments.len()).await;
            return Err(error);
        }

        // Step 7: ordered assembly with durable checkpoints.
        assemble_parts(destination, resume_base, &segments).await?;

        // Step 8: the hash is the only authority on completeness.
        let actual = hash_file(destination)
            .await
            .map_err(|e| DownloadError::io(e.path.clone(), e.source))?;
        if actual != expected_hash {
            // A bad assembly must not seed the next attempt or a later
            // resume; clear both the file and the record.
            let _ = fs::remove_file(destination).await;
            remove_progress(destination).await;
            return Err(DownloadError::checksum_mismatch(
                destination,
                expected_hash,
                actual,
            ));
        }

        Ok(total)
    }
}

/// Derives the part file path for a segment index.
///
/// `patch/data.bin` + 2 -> `patch/data.bin.part2`
#[must_use]
pub fn part_path(destination: &Path, index: usize) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(format!(".part{index}"));
    PathBuf::from(path)
}

/// Sleep applied after each transfer chunk when a speed limit is set.
fn throttle_interval(speed_limit_bytes_per_sec: u64) -> Option<Duration> {
    (speed_limit_bytes_per_sec > 0).then(|| {
        Duration::from_secs_f64(TRANSFER_CHUNK_SIZE as f64 / speed_limit_bytes_per_sec as f64)
    })
}

fn emit(on_progress: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = on_progress {
        callback(event);
    }
}

/// Serializes byte-count updates from concurrent segment tasks so the
/// progress callback observes a non-decreasing sequence.
struct ByteGauge {
    total: u64,
    current: Mutex<u64>,
    on_progress: Option<ProgressCallback>,
}

impl ByteGauge {
    fn new(initial: u64, total: u64, on_progress: Option<ProgressCallback>) -> Self {
        Self {
            total,
            current: Mutex::new(initial),
            on_progress,
        }
    }

    fn advance(&self, len: u64) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *current += len;
        if let Some(callback) = &self.on_progress {
            // Emitted under the lock: values can never arrive out of order.
            callback(ProgressEvent::Progress {
                current: *current,
                total: self.total,
            });
        }
    }
}

/// Validates a recorded resume offset against the server and the partial
/// destination on disk. Returns 0 (restart) unless the server honors
/// ranges, the offset is inside the file, and the destination holds
/// exactly that many bytes (the assembly checkpoint invariant).
async fn resolve_resume_offset(destination: &Path, total: u64, accepts_ranges: bool) -> u64 {
    let recorded = load_progress(destination).await;
    if recorded == 0 {
        return 0;
    }
    if !accepts_ranges {
        debug!("server does not advertise range support; restarting from zero");
        return 0;
    }
    if recorded >= total {
        debug!(recorded, total, "stale resume offset; restarting from zero");
        remove_progress(destination).await;
        return 0;
    }
    match fs::metadata(destination).await {
        Ok(metadata) if metadata.len() == recorded => {
            info!(recorded, "resuming download from prior offset");
            recorded
        }
        _ => {
            debug!(
                recorded,
                "recorded offset does not match the partial file; restarting from zero"
            );
            0
        }
    }
}

/// Concatenates part files onto the destination in index order, deleting
/// each part as it is consumed and checkpointing progress after each one.
async fn assemble_parts(
    destination: &Path,
    resume_base: u64,
    segments: &[SegmentDescriptor],
) -> Result<(), DownloadError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))?;
    // Fresh downloads truncate to zero; resumed ones keep the trusted prefix.
    file.set_len(resume_base)
        .await
        .map_err(|e| DownloadError::io(destination, e))?;
    file.seek(std::io::SeekFrom::Start(resume_base))
        .await
        .map_err(|e| DownloadError::io(destination, e))?;

    let mut writer = BufWriter::with_capacity(ASSEMBLY_BUFFER_SIZE, file);
    let mut assembled = resume_base;

    for segment in segments {
        let part = part_path(destination, segment.index);
        let mut part_file = match fs::File::open(&part).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::missing_part(part));
            }
            Err(error) => return Err(DownloadError::io(part, error)),
        };

        let copied = tokio::io::copy(&mut part_file, &mut writer)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        drop(part_file);

        fs::remove_file(&part)
            .await
            .map_err(|e| DownloadError::io(part.clone(), e))?;
        debug!(part = %part.display(), bytes = copied, "assembled and removed part");

        assembled += copied;
        // The record always reflects contiguous bytes already on disk.
        save_progress(destination, assembled).await;
    }

    Ok(())
}

/// Best-effort removal of every part file of an attempt.
async fn remove_part_files(destination: &Path, count: usize) {
    for index in 0..count {
        let part = part_path(destination, index);
        match fs::remove_file(&part).await {
            Ok(()) => debug!(path = %part.display(), "removed part file after failed attempt"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %part.display(), %error, "failed to remove part file"),
        }
    }
}
