//! Segment store — durable keyed map from scratch path to segment record.
//!
//! Backed by a small SQLite database living in the destination directory.
//! Every write is committed before the call returns, so a crash cannot lose
//! a completed-status record; this is what makes cross-run segmented resume
//! possible. Only the coordinator side touches the store — workers never do.

use crate::error::Result;
use crate::types::{SegmentRecord, SegmentStatus};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::{Path, PathBuf};

/// Durable keyed map of [`SegmentRecord`]s, keyed by scratch path.
#[derive(Clone)]
pub struct SegmentStore {
    pool: SqlitePool,
}

/// Raw row shape; integer columns are converted at the boundary.
#[derive(FromRow)]
struct SegmentRow {
    segment_index: i64,
    start_byte: i64,
    end_byte: i64,
    scratch_path: String,
    status: i64,
}

impl From<SegmentRow> for SegmentRecord {
    fn from(row: SegmentRow) -> Self {
        SegmentRecord {
            segment_index: row.segment_index as usize,
            start_byte: row.start_byte as u64,
            end_byte: row.end_byte as u64,
            scratch_path: PathBuf::from(row.scratch_path),
            status: SegmentStatus::from_i32(row.status as i32),
        }
    }
}

impl SegmentStore {
    /// Open (creating if missing) the store at the given path and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                scratch_path TEXT PRIMARY KEY,
                segment_index INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                status INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert or replace the record stored under its scratch path.
    pub async fn put(&self, record: &SegmentRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO segments (scratch_path, segment_index, start_byte, end_byte, status, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(scratch_path) DO UPDATE SET
                segment_index = excluded.segment_index,
                start_byte = excluded.start_byte,
                end_byte = excluded.end_byte,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.scratch_path.to_string_lossy().into_owned())
        .bind(record.segment_index as i64)
        .bind(record.start_byte as i64)
        .bind(record.end_byte as i64)
        .bind(record.status.to_i32() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the record stored under a scratch path, if any.
    pub async fn get(&self, scratch_path: &Path) -> Result<Option<SegmentRecord>> {
        let row: Option<SegmentRow> = sqlx::query_as(
            r#"
            SELECT segment_index, start_byte, end_byte, scratch_path, status
            FROM segments WHERE scratch_path = ?
            "#,
        )
        .bind(scratch_path.to_string_lossy().into_owned())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SegmentRecord::from))
    }

    /// Transition the status of the record stored under a scratch path.
    ///
    /// Updating a key with no record is a no-op, not an error.
    pub async fn update_status(&self, scratch_path: &Path, status: SegmentStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE segments SET status = ?, updated_at = ? WHERE scratch_path = ?
            "#,
        )
        .bind(status.to_i32() as i64)
        .bind(now)
        .bind(scratch_path.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
