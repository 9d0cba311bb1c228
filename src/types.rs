//! Core types for http-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transfer mode for a download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Single stream writing directly to the final file, with optional resume
    Sequential,
    /// Fixed-size worker pool sharing a FIFO queue of segments (default)
    #[default]
    SegmentedPool,
    /// One worker per segment, statically assigned, no queue
    SegmentedFixed,
}

/// Lifecycle status of a single segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    /// Planned but not yet dispatched to a worker
    Pending,
    /// Currently being downloaded by a worker
    InProgress,
    /// Successfully downloaded to its scratch file
    Completed,
    /// Failed after exhausting retries
    Failed,
}

impl SegmentStatus {
    /// Convert integer status code to SegmentStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => SegmentStatus::Pending,
            1 => SegmentStatus::InProgress,
            2 => SegmentStatus::Completed,
            3 => SegmentStatus::Failed,
            _ => SegmentStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert SegmentStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            SegmentStatus::Pending => 0,
            SegmentStatus::InProgress => 1,
            SegmentStatus::Completed => 2,
            SegmentStatus::Failed => 3,
        }
    }
}

/// What the probe learned about the remote resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Total size in bytes (0 means the server did not report a usable length)
    pub total_bytes: u64,
    /// Whether the server advertises `Accept-Ranges: bytes`
    pub range_supported: bool,
}

/// One planned byte range of the resource, persisted in the segment store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// 0-based index of this segment within the plan
    pub segment_index: usize,
    /// First byte of the range (inclusive)
    pub start_byte: u64,
    /// Last byte of the range (inclusive)
    pub end_byte: u64,
    /// On-disk buffer holding this segment's bytes before assembly
    pub scratch_path: PathBuf,
    /// Current lifecycle status
    pub status: SegmentStatus,
}

impl SegmentRecord {
    /// Number of bytes covered by this segment
    pub fn size_bytes(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }
}

/// Request describing a single download
///
/// Created by the caller and handed to [`HttpDownloader::download`].
/// `segment_count` and `worker_count` must both be at least 1; the request
/// is rejected before any I/O otherwise.
///
/// [`HttpDownloader::download`]: crate::HttpDownloader::download
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Resource URL; the final file name is the last path segment
    pub url: String,

    /// Destination directory (created recursively if missing)
    pub destination: PathBuf,

    /// Transfer mode
    #[serde(default)]
    pub mode: Mode,

    /// Number of segments in segmented modes (default: 4)
    #[serde(default = "default_segment_count")]
    pub segment_count: usize,

    /// Number of pool workers in `segmented_pool` mode (default: 2)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Per-segment retry budget (None = use the configured retry default)
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Continue a previously interrupted transfer where possible (default: true)
    #[serde(default = "default_true")]
    pub allow_resume: bool,
}

impl DownloadRequest {
    /// Create a request with default mode and concurrency settings
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            mode: Mode::default(),
            segment_count: default_segment_count(),
            worker_count: default_worker_count(),
            max_retries: None,
            allow_resume: true,
        }
    }
}

fn default_segment_count() -> usize {
    4
}

fn default_worker_count() -> usize {
    2
}

fn default_true() -> bool {
    true
}

/// Event emitted during the download lifecycle
///
/// Exactly one terminal event (`Complete` or `Failed`) is emitted per
/// [`HttpDownloader::download`] call; `Progress` may fire any number of
/// times before either.
///
/// [`HttpDownloader::download`]: crate::HttpDownloader::download
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The resource was probed and the transfer is starting
    Started {
        /// Resource URL
        url: String,
        /// Probed total size in bytes
        total_bytes: u64,
        /// Effective transfer mode
        mode: Mode,
        /// Number of planned segments (1 in sequential mode)
        segment_count: usize,
    },

    /// Bytes arrived on some stream
    Progress {
        /// Aggregate percentage; may transiently exceed 100 when a retry
        /// re-downloads a range
        percent: f64,
        /// Monotonic sum of all byte deltas, plus any resumed prefix
        downloaded_bytes: u64,
        /// Probed total size in bytes
        total_bytes: u64,
    },

    /// A segment finished downloading to its scratch file
    SegmentCompleted {
        /// 0-based segment index
        index: usize,
        /// First byte of the range (inclusive)
        start_byte: u64,
        /// Last byte of the range (inclusive)
        end_byte: u64,
    },

    /// A segment failed after exhausting its retries
    SegmentFailed {
        /// 0-based segment index
        index: usize,
        /// Human-readable failure reason
        error: String,
    },

    /// The download finished and the final file passed the size check
    Complete {
        /// Path of the final artifact
        path: PathBuf,
    },

    /// The download failed
    Failed {
        /// Human-readable error message
        error: String,
    },
}
