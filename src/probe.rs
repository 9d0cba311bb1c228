//! HTTP probe — discovers the size and range capability of a remote resource.

use crate::error::Result;
use crate::types::ResourceDescriptor;
use reqwest::StatusCode;
use reqwest::header;

/// Probe a URL with a HEAD request.
///
/// On a 200 response the `content-length` header becomes `total_bytes`
/// (missing or unparsable → 0) and `accept-ranges: bytes` sets
/// `range_supported`. Any non-200 response yields a zeroed descriptor, which
/// the coordinator treats as fatal. Network failures are reported as errors
/// and never retried here.
pub async fn probe(client: &reqwest::Client, url: &str) -> Result<ResourceDescriptor> {
    let response = client.head(url).send().await?;
    let status = response.status();

    if status != StatusCode::OK {
        tracing::warn!(%url, status = status.as_u16(), "Probe received non-200 response");
        return Ok(ResourceDescriptor {
            total_bytes: 0,
            range_supported: false,
        });
    }

    let total_bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let range_supported = response
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"));

    tracing::debug!(%url, total_bytes, range_supported, "Probe complete");

    Ok(ResourceDescriptor {
        total_bytes,
        range_supported,
    })
}
