//! # http-dl
//!
//! Backend library for parallel HTTP download applications.
//!
//! ## Design Philosophy
//!
//! http-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Resumable** - Segment state is persisted so interrupted transfers can continue
//! - **Sensible defaults** - Works out of the box with zero configuration
//!
//! A download is either a single sequential stream (with resume from the
//! existing file length) or a segmented transfer: the resource is probed
//! with a HEAD request, partitioned into byte ranges, fetched by concurrent
//! workers into scratch files, and reassembled byte-exactly into the final
//! artifact, whose size is verified against the probed total.
//!
//! ## Quick Start
//!
//! ```no_run
//! use http_dl::{Config, DownloadRequest, HttpDownloader, Mode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = HttpDownloader::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut request = DownloadRequest::new(
//!         "https://example.com/files/archive.tar.gz",
//!         "./downloads",
//!     );
//!     request.mode = Mode::SegmentedPool;
//!     request.segment_count = 8;
//!     request.worker_count = 4;
//!
//!     let path = downloader.download(request).await?;
//!     println!("Saved to {}", path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Segment planning
pub mod planner;
/// HEAD probing of remote resources
pub mod probe;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable segment store
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, HttpConfig, PersistenceConfig, RetryConfig};
pub use downloader::HttpDownloader;
pub use error::{Error, Result};
pub use store::SegmentStore;
pub use types::{
    DownloadRequest, Event, Mode, ResourceDescriptor, SegmentRecord, SegmentStatus,
};
