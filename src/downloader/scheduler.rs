//! Scheduler — runs segment workers and aggregates their messages.
//!
//! Two arrangements share one aggregation loop: a bounded pool fed from a
//! FIFO queue (one task per `Ready` handshake), and a fixed fan-out with one
//! worker statically bound to each segment. Completion is decided from
//! per-segment status, never from the byte sum — the sum only drives
//! progress events and can transiently overshoot when a retry re-downloads
//! a range.

use crate::error::{Error, Result};
use crate::store::SegmentStore;
use crate::types::{Event, SegmentRecord, SegmentStatus};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::{
    SegmentTask, WorkerContext, WorkerMessage, run_fixed_worker, run_pool_worker,
};

/// Buffer size for the aggregate worker message channel
const MESSAGE_CHANNEL_BUFFER: usize = 256;

/// How long to wait for an in-flight worker to quiesce during teardown
const WORKER_QUIESCE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an aborting run keeps draining messages from in-flight workers
const ABORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the scheduler needs besides the records themselves.
pub(crate) struct RunParams<'a> {
    pub(crate) store: &'a SegmentStore,
    pub(crate) events: &'a broadcast::Sender<Event>,
    pub(crate) worker_ctx: WorkerContextSeed<'a>,
    pub(crate) total_bytes: u64,
    /// Bytes already on disk from resumed segments; counted into progress
    pub(crate) baseline_bytes: u64,
}

/// Borrowed pieces from which per-worker contexts are built.
pub(crate) struct WorkerContextSeed<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) url: &'a str,
    pub(crate) retry: crate::config::RetryConfig,
    pub(crate) request_timeout: Option<Duration>,
}

impl WorkerContextSeed<'_> {
    fn build(
        &self,
        messages: mpsc::Sender<WorkerMessage>,
        cancel: CancellationToken,
    ) -> WorkerContext {
        WorkerContext {
            client: self.client.clone(),
            url: self.url.to_string(),
            retry: self.retry.clone(),
            request_timeout: self.request_timeout,
            messages,
            cancel,
        }
    }
}

fn task_for(record: &SegmentRecord) -> SegmentTask {
    SegmentTask {
        index: record.segment_index,
        start_byte: record.start_byte,
        end_byte: record.end_byte,
        scratch_path: record.scratch_path.clone(),
    }
}

/// Pool queue state: pending segment indices plus one task sender per worker.
///
/// Dropping a worker's sender is how that worker is told to stop.
struct PoolDispatch {
    pending: VecDeque<usize>,
    slots: Vec<Option<mpsc::Sender<SegmentTask>>>,
}

/// Run `worker_count` pool workers over every non-completed segment.
///
/// Returns once all segments completed, or with the first terminal segment
/// failure after scratch files have been cleaned up.
pub(crate) async fn run_pool(
    params: &RunParams<'_>,
    records: &mut [SegmentRecord],
    worker_count: usize,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let (msg_tx, mut msg_rx) = mpsc::channel(MESSAGE_CHANNEL_BUFFER);

    let mut slots = Vec::with_capacity(worker_count);
    let mut handles = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
        let (task_tx, task_rx) = mpsc::channel(1);
        slots.push(Some(task_tx));
        let ctx = params.worker_ctx.build(msg_tx.clone(), cancel.clone());
        handles.push(tokio::spawn(run_pool_worker(worker, ctx, task_rx)));
    }
    drop(msg_tx);

    let pending: VecDeque<usize> = records
        .iter()
        .filter(|r| r.status != SegmentStatus::Completed)
        .map(|r| r.segment_index)
        .collect();
    tracing::info!(
        workers = worker_count,
        queued = pending.len(),
        "Starting pool download"
    );

    let dispatch = PoolDispatch { pending, slots };
    let result = drive(params, records, &mut msg_rx, Some(dispatch), &cancel).await;

    finish(records, msg_rx, handles, cancel, result).await
}

/// Run one worker per non-completed segment, each statically assigned.
pub(crate) async fn run_fixed(
    params: &RunParams<'_>,
    records: &mut [SegmentRecord],
) -> Result<()> {
    let cancel = CancellationToken::new();
    let (msg_tx, mut msg_rx) = mpsc::channel(MESSAGE_CHANNEL_BUFFER);

    let mut handles = Vec::new();
    for record in records.iter_mut() {
        if record.status == SegmentStatus::Completed {
            continue;
        }
        record.status = SegmentStatus::InProgress;
        if let Err(e) = params
            .store
            .update_status(&record.scratch_path, SegmentStatus::InProgress)
            .await
        {
            tracing::error!(segment = record.segment_index, error = %e, "Failed to persist segment status");
        }
        let ctx = params.worker_ctx.build(msg_tx.clone(), cancel.clone());
        handles.push(tokio::spawn(run_fixed_worker(ctx, task_for(record))));
    }
    drop(msg_tx);
    tracing::info!(workers = handles.len(), "Starting fixed fan-out download");

    let result = drive(params, records, &mut msg_rx, None, &cancel).await;

    finish(records, msg_rx, handles, cancel, result).await
}

/// Aggregation loop shared by both arrangements.
///
/// Receives worker messages until every planned segment reports a terminal
/// outcome. Pool dispatch (when present) feeds one task per `Ready`
/// handshake and drops a worker's slot once the queue is empty. The first
/// `SegmentError` flips the run into aborting: the queue is cleared, every
/// slot is dropped, the cancel token fires, and remaining messages are
/// drained so in-flight workers can finish their current attempt.
async fn drive(
    params: &RunParams<'_>,
    records: &mut [SegmentRecord],
    msg_rx: &mut mpsc::Receiver<WorkerMessage>,
    mut dispatch: Option<PoolDispatch>,
    cancel: &CancellationToken,
) -> Result<()> {
    let needed = records
        .iter()
        .filter(|r| r.status != SegmentStatus::Completed)
        .count();
    let mut completed = 0usize;
    let mut downloaded = params.baseline_bytes;
    let mut failure: Option<Error> = None;

    loop {
        // Once aborting, keep draining so in-flight workers can report their
        // last outcome, but only for a bounded grace period
        let received = if failure.is_none() {
            msg_rx.recv().await
        } else {
            match tokio::time::timeout(ABORT_DRAIN_TIMEOUT, msg_rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    tracing::warn!("Gave up draining worker messages during abort");
                    break;
                }
            }
        };
        let Some(message) = received else {
            break;
        };
        match message {
            WorkerMessage::Ready { worker } => {
                let Some(d) = dispatch.as_mut() else {
                    continue;
                };
                let next = if failure.is_none() {
                    d.pending.pop_front()
                } else {
                    None
                };
                match next {
                    Some(index) => {
                        let task = task_for(&records[index]);
                        let Some(slot) = d.slots[worker].as_ref() else {
                            d.pending.push_front(index);
                            continue;
                        };
                        if slot.send(task).await.is_ok() {
                            records[index].status = SegmentStatus::InProgress;
                            if let Err(e) = params
                                .store
                                .update_status(
                                    &records[index].scratch_path,
                                    SegmentStatus::InProgress,
                                )
                                .await
                            {
                                tracing::error!(segment = index, error = %e, "Failed to persist segment status");
                            }
                        } else {
                            // Worker is gone; requeue for someone else
                            d.pending.push_front(index);
                            d.slots[worker] = None;
                        }
                    }
                    None => {
                        // Queue drained; closing the channel ends this worker
                        d.slots[worker] = None;
                    }
                }
            }
            WorkerMessage::BytesDownloaded { n } => {
                downloaded += n;
                let percent = 100.0 * downloaded as f64 / params.total_bytes as f64;
                params
                    .events
                    .send(Event::Progress {
                        percent,
                        downloaded_bytes: downloaded,
                        total_bytes: params.total_bytes,
                    })
                    .ok();
            }
            WorkerMessage::SegmentDone { index } => {
                records[index].status = SegmentStatus::Completed;
                if let Err(e) = params
                    .store
                    .update_status(&records[index].scratch_path, SegmentStatus::Completed)
                    .await
                {
                    tracing::error!(segment = index, error = %e, "Failed to persist segment status");
                }
                params
                    .events
                    .send(Event::SegmentCompleted {
                        index,
                        start_byte: records[index].start_byte,
                        end_byte: records[index].end_byte,
                    })
                    .ok();
                completed += 1;
                tracing::debug!(segment = index, completed, needed, "Segment completed");

                if completed == needed && failure.is_none() {
                    if let Some(d) = dispatch.as_mut() {
                        for slot in &mut d.slots {
                            *slot = None;
                        }
                    }
                    break;
                }
            }
            WorkerMessage::SegmentError { index, reason } => {
                records[index].status = SegmentStatus::Failed;
                if let Err(e) = params
                    .store
                    .update_status(&records[index].scratch_path, SegmentStatus::Failed)
                    .await
                {
                    tracing::error!(segment = index, error = %e, "Failed to persist segment status");
                }
                params
                    .events
                    .send(Event::SegmentFailed {
                        index,
                        error: reason.clone(),
                    })
                    .ok();

                if failure.is_none() {
                    tracing::error!(segment = index, %reason, "Segment failed, aborting run");
                    failure = Some(Error::Segment {
                        index,
                        start_byte: records[index].start_byte,
                        end_byte: records[index].end_byte,
                        reason,
                    });
                    cancel.cancel();
                    if let Some(d) = dispatch.as_mut() {
                        d.pending.clear();
                        for slot in &mut d.slots {
                            *slot = None;
                        }
                    }
                }
            }
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Common teardown: make sure every worker terminated, then clean up scratch
/// files if the run failed.
async fn finish(
    records: &[SegmentRecord],
    msg_rx: mpsc::Receiver<WorkerMessage>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    result: Result<()>,
) -> Result<()> {
    cancel.cancel();
    drop(msg_rx);
    join_workers(handles).await;

    if result.is_err() {
        super::assembly::remove_scratch_files(records).await;
    }
    result
}

/// Await every worker handle; abort stragglers after a grace period so the
/// scheduler never leaks tasks.
async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for mut handle in handles {
        if tokio::time::timeout(WORKER_QUIESCE_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Worker did not quiesce in time, aborting it");
            handle.abort();
            handle.await.ok();
        }
    }
}
