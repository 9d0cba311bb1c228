//! Segment worker — executes one ranged GET at a time, streaming the body
//! into a scratch file and reporting progress and terminal outcomes on the
//! scheduler's message channel.

use crate::config::RetryConfig;
use crate::retry::{self, IsRetryable};
use futures::StreamExt;
use reqwest::{StatusCode, header};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One unit of work handed to a worker: a byte range and its scratch file.
#[derive(Clone, Debug)]
pub(crate) struct SegmentTask {
    pub(crate) index: usize,
    pub(crate) start_byte: u64,
    pub(crate) end_byte: u64,
    pub(crate) scratch_path: std::path::PathBuf,
}

/// Messages flowing from workers to the scheduler's aggregate channel.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Pool handshake: the worker is idle and wants a task
    Ready { worker: usize },
    /// `n` bytes were just appended to some scratch file
    BytesDownloaded { n: u64 },
    /// The assigned segment finished successfully
    SegmentDone { index: usize },
    /// The assigned segment failed after exhausting retries
    SegmentError { index: usize, reason: String },
}

/// Shared handles a worker needs; cheap to clone per worker task.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) retry: RetryConfig,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) messages: mpsc::Sender<WorkerMessage>,
    pub(crate) cancel: CancellationToken,
}

/// Failure of a single download attempt inside a worker.
#[derive(Debug, Error)]
pub(crate) enum SegmentFetchError {
    /// Server answered a ranged request with something other than 206
    #[error("unexpected status {status} for ranged request")]
    UnexpectedStatus { status: u16 },

    /// Transport failure (connect, mid-stream reset, deadline)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Scratch file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run is aborting; stop without another attempt
    #[error("download cancelled")]
    Cancelled,
}

impl IsRetryable for SegmentFetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Refused partial-content requests are retried up to the budget
            SegmentFetchError::UnexpectedStatus { .. } => true,
            SegmentFetchError::Network(_) => true,
            SegmentFetchError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            SegmentFetchError::Cancelled => false,
        }
    }
}

/// Pool worker loop: announce readiness, take one task at a time, report the
/// outcome, repeat until the task channel closes.
///
/// The task channel closing is the cancellation signal — a worker whose
/// sender is dropped finishes its current attempt and exits.
pub(crate) async fn run_pool_worker(
    worker: usize,
    ctx: WorkerContext,
    mut tasks: mpsc::Receiver<SegmentTask>,
) {
    loop {
        if ctx
            .messages
            .send(WorkerMessage::Ready { worker })
            .await
            .is_err()
        {
            break;
        }
        let Some(task) = tasks.recv().await else {
            break;
        };
        let outcome = execute_task(&ctx, &task).await;
        if ctx.messages.send(outcome).await.is_err() {
            break;
        }
    }
    tracing::debug!(worker, "Pool worker finished");
}

/// Fixed fan-out worker: download exactly one statically assigned segment.
pub(crate) async fn run_fixed_worker(ctx: WorkerContext, task: SegmentTask) {
    let outcome = execute_task(&ctx, &task).await;
    ctx.messages.send(outcome).await.ok();
}

/// Download one segment with retries and produce its terminal message.
async fn execute_task(ctx: &WorkerContext, task: &SegmentTask) -> WorkerMessage {
    tracing::debug!(
        segment = task.index,
        start = task.start_byte,
        end = task.end_byte,
        "Downloading segment"
    );

    let result =
        retry::download_with_retry(&ctx.retry, &ctx.cancel, || fetch_segment(ctx, task)).await;

    match result {
        Ok(()) => WorkerMessage::SegmentDone { index: task.index },
        Err(e) => WorkerMessage::SegmentError {
            index: task.index,
            reason: e.to_string(),
        },
    }
}

/// One download attempt: ranged GET, stream to scratch file, emit byte deltas.
///
/// Each attempt truncates the scratch file and restarts the segment from its
/// first byte; there is no partial resume within a retry.
async fn fetch_segment(ctx: &WorkerContext, task: &SegmentTask) -> Result<(), SegmentFetchError> {
    if ctx.cancel.is_cancelled() {
        return Err(SegmentFetchError::Cancelled);
    }

    let mut request = ctx.client.get(&ctx.url).header(
        header::RANGE,
        format!("bytes={}-{}", task.start_byte, task.end_byte),
    );
    if let Some(timeout) = ctx.request_timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await?;
    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(SegmentFetchError::UnexpectedStatus {
            status: response.status().as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(&task.scratch_path).await?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(SegmentFetchError::Cancelled);
        }
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        ctx.messages
            .send(WorkerMessage::BytesDownloaded {
                n: chunk.len() as u64,
            })
            .await
            .ok();
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
