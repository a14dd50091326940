//! Byte-range segment planning.
//!
//! A file is split into contiguous, non-overlapping inclusive byte ranges
//! that together cover `[offset, total)` exactly once. The segment count
//! adapts to file size: small files get one segment, mid-size files at
//! most two, and large files one segment per fixed byte quantum capped by
//! the caller's parallelism hint.

use super::constants::{
    DUAL_SEGMENT_THRESHOLD, SEGMENT_SIZE_QUANTUM, SINGLE_SEGMENT_THRESHOLD, TRANSFER_CHUNK_SIZE,
};

/// One contiguous byte range of a file, downloaded independently.
///
/// Bounds are inclusive on both ends, matching HTTP `Range: bytes=start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Zero-based position in the assembly order.
    pub index: usize,
    /// First byte of the range.
    pub start: u64,
    /// Last byte of the range (inclusive).
    pub end: u64,
}

impl SegmentDescriptor {
    /// Number of bytes this segment covers.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// The `Range` header value for this segment.
    #[must_use]
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Chooses how many segments to use for `span` bytes of remaining payload.
///
/// `hint` caps parallelism; the result is always at least 1 and never
/// produces segments smaller than one transfer chunk.
#[must_use]
pub fn plan_segment_count(span: u64, hint: usize) -> usize {
    let hint = hint.max(1);
    if span == 0 {
        return 1;
    }

    let mut count = if span < SINGLE_SEGMENT_THRESHOLD {
        1
    } else if span < DUAL_SEGMENT_THRESHOLD {
        hint.min(2)
    } else {
        usize::try_from(span / SEGMENT_SIZE_QUANTUM)
            .unwrap_or(usize::MAX)
            .clamp(1, hint)
    };

    // A segment must never be smaller than the transfer chunk size.
    if span / (count as u64) < TRANSFER_CHUNK_SIZE {
        count = usize::try_from((span / TRANSFER_CHUNK_SIZE).max(1)).unwrap_or(1);
    }

    count
}

/// Partitions `[offset, total)` into `count` contiguous inclusive ranges.
///
/// The last segment absorbs the remainder of the integer division. `count`
/// is clamped so no segment is empty.
///
/// # Panics
///
/// Panics if `offset >= total` (callers validate the resume offset first).
#[must_use]
pub fn plan_segments(offset: u64, total: u64, count: usize) -> Vec<SegmentDescriptor> {
    assert!(offset < total, "segment plan requires offset < total");

    let span = total - offset;
    let count = u64::try_from(count.max(1)).unwrap_or(1).min(span);
    let part_size = span / count;

    (0..count)
        .map(|i| {
            let start = offset + i * part_size;
            let end = if i == count - 1 {
                total - 1
            } else {
                start + part_size - 1
            };
            SegmentDescriptor {
                index: usize::try_from(i).unwrap_or(usize::MAX),
                start,
                end,
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Asserts the partition law: contiguous, non-overlapping, exact cover.
    fn assert_partitions(segments: &[SegmentDescriptor], offset: u64, total: u64) {
        assert_eq!(segments[0].start, offset);
        assert_eq!(segments.last().unwrap().end, total - 1);
        for pair in segments.windows(2) {
            assert_eq!(
                pair[1].start,
                pair[0].end + 1,
                "segments must be contiguous"
            );
        }
        let sum: u64 = segments.iter().map(SegmentDescriptor::byte_len).sum();
        assert_eq!(sum, total - offset, "lengths must sum to the span");
    }

    #[test]
    fn test_plan_segments_exact_division() {
        let segments = plan_segments(0, 4000, 4);
        assert_eq!(segments.len(), 4);
        assert_partitions(&segments, 0, 4000);
        assert!(segments.iter().all(|s| s.byte_len() == 1000));
    }

    #[test]
    fn test_plan_segments_last_absorbs_remainder() {
        let segments = plan_segments(0, 4003, 4);
        assert_eq!(segments.len(), 4);
        assert_partitions(&segments, 0, 4003);
        assert_eq!(segments[3].byte_len(), 1003);
    }

    #[test]
    fn test_plan_segments_with_resume_offset() {
        let segments = plan_segments(1500, 4000, 2);
        assert_partitions(&segments, 1500, 4000);
        assert_eq!(segments[0].start, 1500);
    }

    #[test]
    fn test_plan_segments_count_clamped_to_span() {
        // 3 bytes cannot support 8 segments.
        let segments = plan_segments(0, 3, 8);
        assert_eq!(segments.len(), 3);
        assert_partitions(&segments, 0, 3);
    }

    #[test]
    fn test_plan_segments_single() {
        let segments = plan_segments(0, 10, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], SegmentDescriptor {
            index: 0,
            start: 0,
            end: 9
        });
    }

    #[test]
    fn test_range_header_is_inclusive() {
        let segment = SegmentDescriptor {
            index: 0,
            start: 100,
            end: 199,
        };
        assert_eq!(segment.range_header(), "bytes=100-199");
        assert_eq!(segment.byte_len(), 100);
    }

    #[test]
    fn test_count_small_file_single_segment() {
        assert_eq!(plan_segment_count(SINGLE_SEGMENT_THRESHOLD - 1, 4), 1);
        assert_eq!(plan_segment_count(1, 4), 1);
    }

    #[test]
    fn test_count_mid_file_at_most_two() {
        assert_eq!(plan_segment_count(SINGLE_SEGMENT_THRESHOLD, 4), 2);
        assert_eq!(plan_segment_count(DUAL_SEGMENT_THRESHOLD - 1, 4), 2);
        assert_eq!(plan_segment_count(DUAL_SEGMENT_THRESHOLD - 1, 1), 1);
    }

    #[test]
    fn test_count_large_file_one_per_quantum_capped_by_hint() {
        // 25 MiB -> 5 quanta, capped at hint 4.
        assert_eq!(plan_segment_count(25 * 1024 * 1024, 4), 4);
        // 10 MiB -> 2 quanta, under the hint.
        assert_eq!(plan_segment_count(DUAL_SEGMENT_THRESHOLD, 4), 2);
        // 60 MiB with a generous hint -> 12 quanta.
        assert_eq!(plan_segment_count(60 * 1024 * 1024, 16), 12);
    }

    #[test]
    fn test_count_never_below_chunk_size() {
        // A span under two transfer chunks collapses to one segment even
        // when thresholds would otherwise allow more.
        let span = TRANSFER_CHUNK_SIZE + 10;
        assert_eq!(plan_segment_count(span, 8), 1);
    }

    #[test]
    fn test_count_zero_span_is_one() {
        assert_eq!(plan_segment_count(0, 4), 1);
    }
}
