//! Assembly and integrity checking — concatenates scratch segment files
//! into the final artifact and validates its length.

use crate::error::{Error, Result};
use crate::types::SegmentRecord;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Concatenate scratch files into `final_path` in segment-index order.
///
/// The records are expected in planning order (they are never reordered).
/// A missing scratch file aborts assembly; the partially assembled final
/// file is left on disk for inspection. Scratch files are not deleted here —
/// cleanup happens only after the integrity check also passes.
pub(crate) async fn assemble(records: &[SegmentRecord], final_path: &Path) -> Result<()> {
    let mut output = tokio::fs::File::create(final_path).await?;

    for record in records {
        let mut part = match tokio::fs::File::open(&record.scratch_path).await {
            Ok(file) => file,
            Err(_) => {
                return Err(Error::Assembly {
                    missing: record.scratch_path.clone(),
                });
            }
        };
        tokio::io::copy(&mut part, &mut output).await?;
    }

    output.flush().await?;
    output.sync_all().await?;
    tracing::debug!(
        segments = records.len(),
        path = %final_path.display(),
        "Assembly complete"
    );
    Ok(())
}

/// Compare the file length against the probed total.
///
/// The file is never deleted on mismatch so the caller can inspect it.
pub(crate) async fn verify_size(path: &Path, expected_total: u64) -> Result<()> {
    let actual = tokio::fs::metadata(path).await?.len();
    if actual != expected_total {
        return Err(Error::IntegrityMismatch {
            expected: expected_total,
            actual,
        });
    }
    Ok(())
}

/// Best-effort deletion of every scratch file in the plan.
pub(crate) async fn remove_scratch_files(records: &[SegmentRecord]) {
    for record in records {
        match tokio::fs::remove_file(&record.scratch_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %record.scratch_path.display(),
                    error = %e,
                    "Failed to delete scratch file"
                );
            }
        }
    }
}
