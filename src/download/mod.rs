//! Segmented HTTP download engine.
//!
//! Downloads one remote file as N concurrent byte-range segments written
//! to `.part<N>` files, assembles them in index order, verifies the result
//! by content hash, and retries failed attempts with exponential backoff.
//! Interrupted downloads resume across restarts via the progress store.
//!
//! # Example
//!
//! ```no_run
//! use patchsync_core::download::{DownloadOptions, SegmentedDownloader};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = DownloadOptions::default();
//! let engine = SegmentedDownloader::from_options(&options);
//! engine
//!     .fetch(
//!         "https://example.com/files/data.bin",
//!         Path::new("./patch/data.bin"),
//!         "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
//!         &options,
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod retry;
mod segment;

pub use client::{HttpClient, SizeProbe};
pub use engine::{
    DEFAULT_SEGMENT_COUNT, DownloadOptions, FetchOutcome, ProgressCallback, ProgressEvent,
    SegmentedDownloader, part_path,
};
pub use error::DownloadError;
pub use retry::{DEFAULT_RETRY_COUNT, RetryDecision, RetryPolicy};
pub use segment::{SegmentDescriptor, plan_segment_count, plan_segments};

// Note: no module-local Result aliases; signatures spell out
// `Result<T, DownloadError>` explicitly.
