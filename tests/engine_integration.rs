//! Integration tests for the segmented download engine.
//!
//! These tests verify the full fetch flow - probe, segment fan-out,
//! assembly, verification, resume, and retry - against mock HTTP servers.

mod support;

use std::time::Duration;

use patchsync_core::download::{DownloadError, DownloadOptions, RetryPolicy, SegmentedDownloader};
use patchsync_core::hash_file;
use patchsync_core::progress::{load_progress, progress_path, save_progress};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{deterministic_bytes, mount_plain_file, mount_ranged_file};

/// A backoff schedule fast enough for tests.
fn fast_backoff() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0)
}

async fn expected_hash_of(content: &[u8]) -> String {
    let tmp = TempDir::new().expect("temp dir");
    let path = tmp.path().join("reference");
    tokio::fs::write(&path, content).await.expect("write reference");
    hash_file(&path).await.expect("hash reference")
}

fn no_parts_left(destination: &std::path::Path) -> bool {
    let dir = destination.parent().expect("destination has a parent");
    !std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .contains(".part")
        })
}

#[tokio::test]
async fn test_multi_segment_download_reassembles_original_bytes() {
    // 11 MiB forces the large-file planning branch (two 5 MiB quanta).
    let content = deterministic_bytes(11 * 1024 * 1024);
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/big.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("big.bin");
    let expected = expected_hash_of(&content).await;

    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/big.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("download should succeed");

    let downloaded = tokio::fs::read(&destination).await.expect("read destination");
    assert_eq!(downloaded, content, "assembly must be byte-identical");
    assert!(no_parts_left(&destination), "no part files may remain");
    assert!(
        !progress_path(&destination).exists(),
        "progress record must be removed on success"
    );

    // Two segments plus the HEAD probe.
    let requests = server.received_requests().await.expect("recorded requests");
    let gets = requests.iter().filter(|r| r.method.as_str() == "GET").count();
    assert_eq!(gets, 2, "11 MiB should download as exactly two segments");
}

#[tokio::test]
async fn test_small_file_uses_single_segment() {
    let content = deterministic_bytes(64 * 1024);
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/small.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("small.bin");
    let expected = expected_hash_of(&content).await;

    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/small.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("download should succeed");

    let requests = server.received_requests().await.expect("recorded requests");
    let gets = requests.iter().filter(|r| r.method.as_str() == "GET").count();
    assert_eq!(gets, 1);
    assert_eq!(
        tokio::fs::read(&destination).await.expect("read destination"),
        content
    );
}

#[tokio::test]
async fn test_matching_destination_makes_zero_network_calls() {
    let content = b"already in sync";
    let server = MockServer::start().await; // no mocks mounted on purpose

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("fresh.bin");
    tokio::fs::write(&destination, content).await.expect("seed destination");
    let expected = expected_hash_of(content).await;

    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    let outcome = engine
        .fetch(
            &format!("{}/files/fresh.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("short-circuit should succeed");

    assert!(matches!(
        outcome,
        patchsync_core::download::FetchOutcome::AlreadyComplete
    ));
    let requests = server.received_requests().await.expect("recorded requests");
    assert!(requests.is_empty(), "no request may be made for a fresh file");
}

#[tokio::test]
async fn test_resume_downloads_only_the_tail() {
    let content = deterministic_bytes(512 * 1024);
    let resume_at = 200 * 1024u64;
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/resumable.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("resumable.bin");
    // A prior run left the assembled prefix plus a matching record.
    tokio::fs::write(&destination, &content[..resume_at as usize])
        .await
        .expect("seed partial destination");
    save_progress(&destination, resume_at).await;

    let expected = expected_hash_of(&content).await;
    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/resumable.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("resumed download should succeed");

    assert_eq!(
        tokio::fs::read(&destination).await.expect("read destination"),
        content,
        "resumption must be lossless"
    );
    // Every range requested must start at or past the resume offset.
    let requests = server.received_requests().await.expect("recorded requests");
    for request in requests.iter().filter(|r| r.method.as_str() == "GET") {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .expect("segment GET must carry a Range header");
        let start: u64 = range
            .strip_prefix("bytes=")
            .and_then(|spec| spec.split('-').next())
            .and_then(|s| s.parse().ok())
            .expect("parsable range start");
        assert!(start >= resume_at, "range {range} precedes resume offset");
    }
}

#[tokio::test]
async fn test_stale_record_without_prefix_restarts_from_zero() {
    let content = deterministic_bytes(300 * 1024);
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/f.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("f.bin");
    // Record without any partial destination: nothing on disk to trust.
    save_progress(&destination, 100 * 1024).await;

    let expected = expected_hash_of(&content).await;
    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/f.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("download should succeed from scratch");

    assert_eq!(
        tokio::fs::read(&destination).await.expect("read destination"),
        content
    );
}

#[tokio::test]
async fn test_server_without_range_support_still_downloads() {
    let content = deterministic_bytes(96 * 1024);
    let server = MockServer::start().await;
    mount_plain_file(&server, "/files/plain.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("plain.bin");
    // Leftover record must be ignored when the server cannot resume.
    save_progress(&destination, 10).await;

    let expected = expected_hash_of(&content).await;
    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/plain.bin", server.uri()),
            &destination,
            &expected,
            &options,
            None,
        )
        .await
        .expect("download should fall back to a single full-body segment");

    assert_eq!(
        tokio::fs::read(&destination).await.expect("read destination"),
        content
    );
}

#[tokio::test]
async fn test_retry_exhaustion_leaves_no_artifacts() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/broken.bin"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("broken.bin");

    let options = DownloadOptions {
        retry_count: 3,
        ..DownloadOptions::default()
    };
    let engine = SegmentedDownloader::from_options(&options).with_backoff(fast_backoff());
    let result = engine
        .fetch(
            &format!("{}/files/broken.bin", server.uri()),
            &destination,
            "0000000000000000000000000000000000000000000000000000000000000000",
            &options,
            None,
        )
        .await;

    assert!(matches!(result, Err(DownloadError::HttpStatus { status: 500, .. })));
    assert!(!destination.exists());
    assert!(no_parts_left(&destination));

    // One HEAD per attempt, no GETs.
    let requests = server.received_requests().await.expect("recorded requests");
    let heads = requests.iter().filter(|r| r.method.as_str() == "HEAD").count();
    assert_eq!(heads, 3, "every attempt probes once");
    assert_eq!(
        requests.iter().filter(|r| r.method.as_str() == "GET").count(),
        0
    );
}

#[tokio::test]
async fn test_missing_content_length_is_size_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/sizeless.bin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tmp = TempDir::new().expect("temp dir");
    let options = DownloadOptions {
        retry_count: 2,
        ..DownloadOptions::default()
    };
    let engine = SegmentedDownloader::from_options(&options).with_backoff(fast_backoff());
    let result = engine
        .fetch(
            &format!("{}/files/sizeless.bin", server.uri()),
            &tmp.path().join("sizeless.bin"),
            "0000000000000000000000000000000000000000000000000000000000000000",
            &options,
            None,
        )
        .await;

    assert!(matches!(result, Err(DownloadError::SizeUnknown { .. })));
}

#[tokio::test]
async fn test_persistent_checksum_mismatch_cleans_up_everything() {
    let content = deterministic_bytes(128 * 1024);
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/corrupt.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("corrupt.bin");

    let options = DownloadOptions {
        retry_count: 2,
        ..DownloadOptions::default()
    };
    let engine = SegmentedDownloader::from_options(&options).with_backoff(fast_backoff());
    let result = engine
        .fetch(
            &format!("{}/files/corrupt.bin", server.uri()),
            &destination,
            // The server will never produce this hash.
            "1111111111111111111111111111111111111111111111111111111111111111",
            &options,
            None,
        )
        .await;

    assert!(matches!(result, Err(DownloadError::ChecksumMismatch { .. })));
    assert!(
        !destination.exists(),
        "a failed verification must not leave a partial destination"
    );
    assert!(no_parts_left(&destination));
    assert_eq!(load_progress(&destination).await, 0);
}

#[tokio::test]
async fn test_cancelled_token_fails_fast_without_requests() {
    let server = MockServer::start().await;

    let tmp = TempDir::new().expect("temp dir");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options).with_cancellation(cancel);
    let result = engine
        .fetch(
            &format!("{}/files/never.bin", server.uri()),
            &tmp.path().join("never.bin"),
            "0000000000000000000000000000000000000000000000000000000000000000",
            &options,
            None,
        )
        .await;

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    let requests = server.received_requests().await.expect("recorded requests");
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_progress_events_are_monotonic_and_terminate_with_completed() {
    use patchsync_core::ProgressEvent;
    use std::sync::{Arc, Mutex};

    let content = deterministic_bytes(512 * 1024);
    let server = MockServer::start().await;
    mount_ranged_file(&server, "/files/watched.bin", &content).await;

    let tmp = TempDir::new().expect("temp dir");
    let destination = tmp.path().join("watched.bin");
    let expected = expected_hash_of(&content).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: patchsync_core::ProgressCallback =
        Arc::new(move |event| sink.lock().unwrap().push(event));

    let options = DownloadOptions::default();
    let engine = SegmentedDownloader::from_options(&options);
    engine
        .fetch(
            &format!("{}/files/watched.bin", server.uri()),
            &destination,
            &expected,
            &options,
            Some(callback),
        )
        .await
        .expect("download should succeed");

    let events = events.lock().unwrap();
    assert!(matches!(events.last(), Some(ProgressEvent::Completed)));

    let total = content.len() as u64;
    let mut last = 0;
    let mut saw_final = false;
    for event in events.iter() {
        if let ProgressEvent::Progress { current, total: t } = event {
            assert_eq!(*t, total);
            assert!(*current >= last, "progress must be non-decreasing");
            last = *current;
            saw_final = *current == total || saw_final;
        }
    }
    assert!(saw_final, "the final progress event reports (total, total)");
}
