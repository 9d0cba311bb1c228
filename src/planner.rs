//! Segment planner — partitions the byte space of a resource into
//! contiguous ranges and allocates a scratch path per range.

use crate::error::{Error, Result};
use crate::types::{SegmentRecord, SegmentStatus};
use std::path::Path;

/// Partition `[0, total_bytes)` into at most `segment_count` contiguous
/// segments.
///
/// Segment size is `ceil(total / N)`; every segment but the last covers
/// exactly that many bytes and the last absorbs the remainder. When the
/// resource has fewer bytes than the requested segment count, fewer records
/// than requested are returned rather than empty ranges; the partition
/// invariants always hold over what is returned.
///
/// Scratch paths are `<dir>/<file_name>.part<i>`. Fails if `total_bytes`
/// or `segment_count` is zero.
pub fn plan(
    total_bytes: u64,
    segment_count: usize,
    dir: &Path,
    file_name: &str,
) -> Result<Vec<SegmentRecord>> {
    if total_bytes == 0 {
        return Err(Error::config("cannot plan segments for an empty resource"));
    }
    if segment_count == 0 {
        return Err(Error::config("segment_count must be at least 1"));
    }

    let segment_size = total_bytes.div_ceil(segment_count as u64);
    let mut records = Vec::with_capacity(segment_count);
    let mut start_byte = 0u64;

    while start_byte < total_bytes {
        let end_byte = (start_byte + segment_size - 1).min(total_bytes - 1);
        let index = records.len();
        records.push(SegmentRecord {
            segment_index: index,
            start_byte,
            end_byte,
            scratch_path: dir.join(format!("{file_name}.part{index}")),
            status: SegmentStatus::Pending,
        });
        start_byte = end_byte + 1;
    }

    tracing::debug!(
        total_bytes,
        requested = segment_count,
        planned = records.len(),
        segment_size,
        "Planned segments"
    );

    Ok(records)
}
