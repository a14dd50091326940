//! Durable sidecar records of partial download progress.
//!
//! Each in-progress destination owns one `<destination>.progress` file
//! holding a decimal byte offset. The record is advisory: it accelerates
//! resume decisions but is never a correctness guarantee, and it exists
//! only while a download is incomplete - success removes it. Keeping the
//! offset out-of-band means a partially written destination can never be
//! mistaken for a complete one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

/// Filename suffix for progress records.
pub const PROGRESS_SUFFIX: &str = ".progress";

/// Derives the sidecar record path for a destination.
///
/// `patch/data.bin` -> `patch/data.bin.progress`
#[must_use]
pub fn progress_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(PROGRESS_SUFFIX);
    PathBuf::from(path)
}

/// Persists the byte offset for a destination, overwriting any prior record.
///
/// Persist failures are logged and swallowed: a lost record only degrades
/// resume to a restart.
pub async fn save_progress(destination: &Path, bytes_downloaded: u64) {
    let path = progress_path(destination);
    if let Err(error) = tokio::fs::write(&path, bytes_downloaded.to_string()).await {
        warn!(path = %path.display(), %error, "failed to persist progress record");
    }
}

/// Loads the recorded byte offset for a destination.
///
/// Returns `0` when no record exists or the record is unparsable; never
/// errors.
pub async fn load_progress(destination: &Path) -> u64 {
    let path = progress_path(destination);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Deletes the record for a destination, tolerating "already absent".
pub async fn remove_progress(destination: &Path) {
    let path = progress_path(destination);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "removed progress record"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to remove progress record");
        }
    }
}

/// Deletes every progress record under `directory` older than `max_age`
/// (by last-modified time), recursing into subdirectories.
///
/// Age is the only criterion: callers must only sweep when no download
/// below `directory` is in flight.
pub async fn sweep_progress_records(directory: &Path, max_age: Duration) {
    let mut pending = vec![directory.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %dir.display(), %error, "failed to list directory during sweep");
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PROGRESS_SUFFIX))
            {
                continue;
            }

            if record_older_than(&path, max_age).await {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "swept stale progress record"),
                    Err(error) => {
                        warn!(path = %path.display(), %error, "failed to sweep progress record");
                    }
                }
            }
        }
    }
}

/// Whether a record's last-modified time is at least `max_age` in the past.
/// Unreadable metadata keeps the record (sweep is best-effort).
async fn record_older_than(path: &Path, max_age: Duration) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    modified
        .elapsed()
        .map(|age| age >= max_age)
        .unwrap_or(false)
}
