//! Core downloader implementation split into focused submodules.
//!
//! The `HttpDownloader` struct and the per-download coordinator live here;
//! the mechanics are organized by domain:
//! - [`worker`] - Per-segment ranged GET execution and retry
//! - [`scheduler`] - Worker pool / fixed fan-out orchestration and aggregation
//! - [`sequential`] - Single-stream mode with resume
//! - [`assembly`] - Scratch file concatenation, size check, cleanup

mod assembly;
mod scheduler;
mod sequential;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::planner;
use crate::probe;
use crate::store::SegmentStore;
use crate::types::{DownloadRequest, Event, Mode, ResourceDescriptor, SegmentStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Buffer size for the consumer-facing event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Main downloader instance (cloneable - shared state is Arc-wrapped)
///
/// One `HttpDownloader` can serve any number of sequential `download` calls;
/// each call runs its own coordinator, workers, and segment store handle.
#[derive(Clone)]
pub struct HttpDownloader {
    /// Shared HTTP client (connection pooling across downloads)
    client: reqwest::Client,
    /// Configuration (wrapped in Arc for sharing across tasks)
    config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl HttpDownloader {
    /// Create a new downloader from a configuration.
    ///
    /// Builds the shared HTTP client (connect timeout and user agent from
    /// [`HttpConfig`](crate::HttpConfig)) and the event channel.
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout)
            .user_agent(config.http.user_agent.clone())
            .build()?;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            config: Arc::new(config),
            event_tx,
        })
    }

    /// Subscribe to download events.
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber that falls behind by more than the channel
    /// capacity receives a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Download a resource to disk.
    ///
    /// Runs the full coordinator flow for the request: validate, probe,
    /// then transfer sequentially or in segments, assemble, and verify the
    /// final size. Exactly one terminal event is emitted —
    /// [`Event::Complete`] with the final path on success, or
    /// [`Event::Failed`] with the error message — mirroring the returned
    /// `Result`.
    pub async fn download(&self, request: DownloadRequest) -> Result<PathBuf> {
        match self.run(&request).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Download complete");
                self.emit_event(Event::Complete { path: path.clone() });
                Ok(path)
            }
            Err(e) => {
                tracing::error!(url = %request.url, error = %e, "Download failed");
                self.emit_event(Event::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// downloads proceed whether or not anyone is listening.
    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Coordinator flow for a single request.
    async fn run(&self, request: &DownloadRequest) -> Result<PathBuf> {
        validate_request(request)?;

        tokio::fs::create_dir_all(&request.destination).await?;
        let file_name = file_name_from_url(&request.url)?;
        let final_path = request.destination.join(&file_name);

        let descriptor = probe::probe(&self.client, &request.url).await?;
        if descriptor.total_bytes == 0 {
            return Err(Error::ProbeFailed {
                url: request.url.clone(),
                reason: "server did not report a positive content length".into(),
            });
        }

        let mode = effective_mode(request.mode, &descriptor, &request.url);
        let segment_count = match mode {
            Mode::Sequential => 1,
            _ => request.segment_count,
        };
        self.emit_event(Event::Started {
            url: request.url.clone(),
            total_bytes: descriptor.total_bytes,
            mode,
            segment_count,
        });

        match mode {
            Mode::Sequential => {
                sequential::run(
                    sequential::SequentialParams {
                        client: &self.client,
                        url: &request.url,
                        events: &self.event_tx,
                        total_bytes: descriptor.total_bytes,
                        range_supported: descriptor.range_supported,
                        allow_resume: request.allow_resume,
                    },
                    &final_path,
                )
                .await?;
                assembly::verify_size(&final_path, descriptor.total_bytes).await?;
            }
            Mode::SegmentedPool | Mode::SegmentedFixed => {
                self.run_segmented(request, &descriptor, &file_name, &final_path, mode)
                    .await?;
            }
        }

        Ok(final_path)
    }

    /// Segmented transfer: plan, persist, schedule, assemble, verify, clean up.
    async fn run_segmented(
        &self,
        request: &DownloadRequest,
        descriptor: &ResourceDescriptor,
        file_name: &str,
        final_path: &Path,
        mode: Mode,
    ) -> Result<()> {
        let total = descriptor.total_bytes;
        let mut records = planner::plan(
            total,
            request.segment_count,
            &request.destination,
            file_name,
        )?;

        let store_path = request
            .destination
            .join(&self.config.persistence.manifest_name);
        let store = SegmentStore::open(&store_path).await?;

        // Persist the plan; with resume enabled, keep segments whose stored
        // record is completed and whose scratch file is intact
        let mut baseline_bytes = 0u64;
        for record in &mut records {
            if request.allow_resume
                && let Some(existing) = store.get(&record.scratch_path).await?
                && existing.status == SegmentStatus::Completed
                && existing.start_byte == record.start_byte
                && existing.end_byte == record.end_byte
                && scratch_file_len(&record.scratch_path).await == Some(record.size_bytes())
            {
                tracing::info!(
                    segment = record.segment_index,
                    "Reusing completed segment from a previous run"
                );
                record.status = SegmentStatus::Completed;
                baseline_bytes += record.size_bytes();
                continue;
            }
            store.put(record).await?;
        }

        if baseline_bytes > 0 {
            self.emit_event(Event::Progress {
                percent: 100.0 * baseline_bytes as f64 / total as f64,
                downloaded_bytes: baseline_bytes,
                total_bytes: total,
            });
        }

        let pending = records
            .iter()
            .filter(|r| r.status != SegmentStatus::Completed)
            .count();
        if pending > 0 {
            let retry = match request.max_retries {
                Some(max_retries) => self.config.retry.with_max_attempts(max_retries),
                None => self.config.retry.clone(),
            };
            let params = scheduler::RunParams {
                store: &store,
                events: &self.event_tx,
                worker_ctx: scheduler::WorkerContextSeed {
                    client: &self.client,
                    url: &request.url,
                    retry,
                    request_timeout: self.config.http.request_timeout,
                },
                total_bytes: total,
                baseline_bytes,
            };
            match mode {
                Mode::SegmentedPool => {
                    scheduler::run_pool(&params, &mut records, request.worker_count).await?
                }
                Mode::SegmentedFixed => scheduler::run_fixed(&params, &mut records).await?,
                Mode::Sequential => unreachable!("sequential mode never reaches run_segmented"),
            }
        } else {
            tracing::info!("All segments already present, skipping transfer");
        }

        assembly::assemble(&records, final_path).await?;
        assembly::verify_size(final_path, total).await?;
        assembly::remove_scratch_files(&records).await;
        Ok(())
    }
}

/// Reject invalid concurrency settings before any I/O happens.
fn validate_request(request: &DownloadRequest) -> Result<()> {
    if request.segment_count == 0 {
        return Err(Error::config("segment_count must be at least 1"));
    }
    if request.worker_count == 0 {
        return Err(Error::config("worker_count must be at least 1"));
    }
    Ok(())
}

/// Derive the destination file name from the last path segment of the URL.
fn file_name_from_url(url: &str) -> Result<String> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidUrl(format!("no file name in URL path: {url}")))
}

/// A segmented request against a server without range support collapses to a
/// single sequential stream.
fn effective_mode(requested: Mode, descriptor: &ResourceDescriptor, url: &str) -> Mode {
    if requested != Mode::Sequential && !descriptor.range_supported {
        tracing::warn!(
            %url,
            "Server does not accept ranges, falling back to sequential mode"
        );
        return Mode::Sequential;
    }
    requested
}

async fn scratch_file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
