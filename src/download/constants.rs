//! Constants for the download module (chunk sizes, segment planning, timeouts).

/// Transfer chunk size for segment streaming (256 KiB).
///
/// Also the floor for segment length: planning never produces a segment
/// smaller than one transfer chunk.
pub const TRANSFER_CHUNK_SIZE: u64 = 256 * 1024;

/// Buffer capacity when assembling part files into the destination (1 MiB).
pub const ASSEMBLY_BUFFER_SIZE: usize = 1024 * 1024;

/// Files below this size download as a single segment (1 MiB).
pub const SINGLE_SEGMENT_THRESHOLD: u64 = 1024 * 1024;

/// Files below this size use at most two segments (10 MiB).
pub const DUAL_SEGMENT_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Large files get one segment per this many bytes (5 MiB), capped by the
/// caller's parallelism hint.
pub const SEGMENT_SIZE_QUANTUM: u64 = 5 * 1024 * 1024;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default total per-request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
