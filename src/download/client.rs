//! HTTP plumbing for the segmented download engine.
//!
//! This module provides the `HttpClient` wrapper which handles the three
//! requests the engine consumes: a `HEAD` size/range-support probe, ranged
//! `GET`s streamed into part files, and a plain `GET` for text documents
//! (the manifest).

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use super::segment::SegmentDescriptor;

/// What the size probe learned about a remote file.
#[derive(Debug, Clone, Copy)]
pub struct SizeProbe {
    /// Total size in bytes (always > 0).
    pub total_size: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
}

/// HTTP client for size probes and ranged segment fetches.
///
/// Designed to be created once and cloned into concurrent tasks, taking
/// advantage of reqwest's connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts (10s connect, 30s total).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Creates a client with explicit connect and total-request timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches a text document (the manifest) in full.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on network failure, timeout, or a non-2xx
    /// status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send_get(url, None).await?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }

    /// Issues a header-only request to learn a file's total size and
    /// whether the server honors byte ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::SizeUnknown`] when the server does not
    /// report a positive Content-Length, plus the usual transport errors.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe_size(&self, url: &str) -> Result<SizeProbe, DownloadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| map_send_error(url, e))?;

        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&size| size > 0)
            .ok_or_else(|| DownloadError::size_unknown(url))?;

        let accepts_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        debug!(total_size, accepts_ranges, "size probe complete");
        Ok(SizeProbe {
            total_size,
            accepts_ranges,
        })
    }

    /// Downloads one byte-range segment into `part_path`.
    ///
    /// Any pre-existing part file for the index is deleted first so a
    /// retry never appends onto stale data. `on_chunk` is invoked with the
    /// length of each transfer chunk as it lands; when `throttle` is set,
    /// the task sleeps that long after every chunk to cap throughput.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Transport errors map to `Network`/`Timeout`/`HttpStatus`; a server
    /// that ignores a mid-file range request (200 instead of 206) yields
    /// [`DownloadError::SegmentFetch`]. The part file is removed on any
    /// error.
    #[instrument(skip(self, on_chunk, throttle), fields(url = %url, index = segment.index))]
    pub async fn fetch_segment(
        &self,
        url: &str,
        segment: &SegmentDescriptor,
        part_path: &Path,
        throttle: Option<Duration>,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64, DownloadError> {
        match tokio::fs::remove_file(part_path).await {
            Ok(()) => debug!(path = %part_path.display(), "removed stale part file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DownloadError::io(part_path, e)),
        }

        let result = self
            .fetch_segment_inner(url, segment, part_path, throttle, &mut on_chunk)
            .await;

        if result.is_err() {
            // Never leave a partial part behind for a later retry to trust.
            let _ = tokio::fs::remove_file(part_path).await;
        }

        result
    }

    async fn fetch_segment_inner(
        &self,
        url: &str,
        segment: &SegmentDescriptor,
        part_path: &Path,
        throttle: Option<Duration>,
        on_chunk: &mut impl FnMut(u64),
    ) -> Result<u64, DownloadError> {
        let response = self.send_get(url, Some(&segment.range_header())).await?;

        // 206 is the honored-range answer. A 200 is only acceptable for a
        // segment that starts at byte zero (the server sent the whole body
        // and this segment covers it).
        let status = response.status().as_u16();
        if status != 206 && segment.start != 0 {
            return Err(DownloadError::segment_fetch(
                url,
                segment.index,
                format!("server ignored range request (HTTP {status})"),
            ));
        }

        let file = File::create(part_path)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(part_path, e))?;
            bytes_written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);

            if let Some(interval) = throttle {
                tokio::time::sleep(interval).await;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;

        debug!(bytes = bytes_written, path = %part_path.display(), "segment complete");
        Ok(bytes_written)
    }

    async fn send_get(
        &self,
        url: &str,
        range_header: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(range) = range_header {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(|e| map_send_error(url, e))?;

        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        Ok(response)
    }
}

fn map_send_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}
