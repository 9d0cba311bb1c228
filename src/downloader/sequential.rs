//! Sequential downloader — single stream writing directly to the final
//! file, resuming from the existing file length when the server honors
//! ranges.

use crate::error::{Error, Result};
use crate::types::Event;
use futures::StreamExt;
use reqwest::{StatusCode, header};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

/// Deadline for the initial GET to produce response headers
const HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs for one sequential transfer.
pub(crate) struct SequentialParams<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) url: &'a str,
    pub(crate) events: &'a broadcast::Sender<Event>,
    pub(crate) total_bytes: u64,
    pub(crate) range_supported: bool,
    pub(crate) allow_resume: bool,
}

/// Stream the resource into `dest_path`.
///
/// With `allow_resume` and a range-capable server, an existing destination
/// file is continued from its current length; a file already at the full
/// length succeeds without issuing a GET, and a file longer than the probed
/// total is treated as corrupt and restarted from scratch. Any status other
/// than 200/206 is fatal for this mode — except 416 on a resume attempt,
/// which means the server resource changed: the partial file is deleted and
/// the transfer restarts once from byte zero.
pub(crate) async fn run(params: SequentialParams<'_>, dest_path: &Path) -> Result<()> {
    let total = params.total_bytes;
    let mut resume_from = 0u64;

    match tokio::fs::metadata(dest_path).await {
        Ok(metadata) if params.allow_resume && params.range_supported => {
            let existing = metadata.len();
            if existing == total {
                tracing::info!(path = %dest_path.display(), "Destination already complete, skipping transfer");
                emit_progress(&params, total);
                return Ok(());
            }
            if existing > total {
                tracing::warn!(
                    path = %dest_path.display(),
                    existing,
                    total,
                    "Existing file longer than resource, restarting from scratch"
                );
                tokio::fs::remove_file(dest_path).await?;
            } else {
                resume_from = existing;
                tracing::info!(path = %dest_path.display(), resume_from, "Resuming sequential download");
            }
        }
        Ok(_) => {
            // Resume disabled or server cannot serve ranges: start over
            tokio::fs::remove_file(dest_path).await?;
        }
        Err(_) => {}
    }

    let mut restarted_after_416 = false;
    loop {
        let mut request = params.client.get(params.url);
        if resume_from > 0 {
            request = request.header(
                header::RANGE,
                format!("bytes={}-{}", resume_from, total - 1),
            );
        }

        let response = tokio::time::timeout(HEADER_TIMEOUT, request.send())
            .await
            .map_err(|_| Error::Timeout(HEADER_TIMEOUT))??;

        let file = match response.status() {
            StatusCode::PARTIAL_CONTENT if resume_from > 0 => {
                tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(dest_path)
                    .await?
            }
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                // A 200 answer to a ranged request means the server ignored
                // the range and is sending the full body
                resume_from = 0;
                tokio::fs::File::create(dest_path).await?
            }
            StatusCode::RANGE_NOT_SATISFIABLE if resume_from > 0 && !restarted_after_416 => {
                tracing::warn!(
                    url = params.url,
                    "Server rejected resume range (416), restarting from scratch"
                );
                tokio::fs::remove_file(dest_path).await.ok();
                resume_from = 0;
                restarted_after_416 = true;
                continue;
            }
            status => {
                return Err(Error::UnexpectedStatus {
                    status: status.as_u16(),
                });
            }
        };

        stream_body(&params, response, file, resume_from).await?;
        return Ok(());
    }
}

/// Stream the response body to the open file, emitting progress deltas on
/// top of the resumed prefix.
async fn stream_body(
    params: &SequentialParams<'_>,
    response: reqwest::Response,
    mut file: tokio::fs::File,
    resume_from: u64,
) -> Result<()> {
    let mut downloaded = resume_from;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        emit_progress(params, downloaded);
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

fn emit_progress(params: &SequentialParams<'_>, downloaded: u64) {
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
