//! Job repository: the `jobs` and `job_batches` tables.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, Database, DatabaseError};
use crate::job::JobStatus;

/// Default and maximum number of rows returned by [`list`].
pub const DEFAULT_LIST_LIMIT: u64 = 100;

/// A job row from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRow {
    pub id: i64,
    pub uploader_name: String,
    pub file_path: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<String>,
    pub error: Option<String>,
    pub batch_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get("id")?,
            uploader_name: row.get("uploader_name")?,
            file_path: row.get("file_path")?,
            status,
            progress: row.get("progress")?,
            result: row.get("result")?,
            error: row.get("error")?,
            batch_id: row.get("batch_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields for a freshly submitted job. Status starts `pending`, progress 0.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub uploader_name: String,
    pub file_path: String,
    pub batch_id: Option<i64>,
}

/// A partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// Query filter for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub uploader_name: Option<String>,
    pub batch_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
}

/// Creates a batch label for one multi-file upload.
pub fn create_batch(db: &Database, uploader_name: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_batches (uploader_name, created_at) VALUES (?1, ?2)",
            params![uploader_name, now_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Inserts a pending job and returns its id.
pub fn create_job(db: &Database, job: &NewJob) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_job(conn, job))
}

/// Creates a batch plus one pending job per file reference, atomically.
pub fn enqueue_batch(
    db: &Database,
    uploader_name: &str,
    file_paths: &[String],
) -> Result<(i64, Vec<i64>), DatabaseError> {
    db.with_transaction(|tx| {
        tx.execute(
            "INSERT INTO job_batches (uploader_name, created_at) VALUES (?1, ?2)",
            params![uploader_name, now_timestamp()],
        )?;
        let batch_id = tx.last_insert_rowid();

        let mut job_ids = Vec::with_capacity(file_paths.len());
        for file_path in file_paths {
            let id = insert_job(
                tx,
                &NewJob {
                    uploader_name: uploader_name.to_string(),
                    file_path: file_path.clone(),
                    batch_id: Some(batch_id),
                },
            )?;
            job_ids.push(id);
        }

        Ok((batch_id, job_ids))
    })
}

fn insert_job(conn: &Connection, job: &NewJob) -> Result<i64, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO jobs (uploader_name, file_path, status, progress, batch_id, created_at, updated_at)
         VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)",
        params![job.uploader_name, job.file_path, job.batch_id, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Applies a partial update to one job.
///
/// Progress never decreases and is capped at 100. A status change is
/// checked against the current status first; backwards or skipping moves
/// return [`DatabaseError::InvalidTransition`] and nothing is written.
pub fn update(db: &Database, id: i64, update: &JobUpdate) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| apply_update(tx, id, update))
}

/// [`update`] against a connection the caller already holds, so it can
/// join a larger transaction.
pub(crate) fn apply_update(
    conn: &Connection,
    id: i64,
    update: &JobUpdate,
) -> Result<(), DatabaseError> {
    let current: String = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .optional()?
        .ok_or(DatabaseError::JobNotFound(id))?;
    let current: JobStatus = current
        .parse()
        .map_err(|e: crate::job::UnknownStatus| DatabaseError::UnknownStatus {
            id,
            status: e.0,
        })?;

    if let Some(next) = update.status {
        if !current.can_transition_to(next) {
            return Err(DatabaseError::InvalidTransition {
                id,
                from: current,
                to: next,
            });
        }
    }

    conn.execute(
        "UPDATE jobs SET
            status = COALESCE(?2, status),
            progress = MAX(progress, COALESCE(?3, progress)),
            result = COALESCE(?4, result),
            error = COALESCE(?5, error),
            updated_at = ?6
         WHERE id = ?1",
        params![
            id,
            update.status.map(JobStatus::as_str),
            update.progress.map(|p| p.min(100)),
            update.result,
            update.error,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

/// Terminal update: status, progress 100, result and error.
pub(crate) fn finish_update(
    status: JobStatus,
    result: Option<String>,
    error: Option<String>,
) -> JobUpdate {
    debug_assert!(status.is_terminal());
    JobUpdate {
        status: Some(status),
        progress: Some(100),
        result,
        error,
    }
}

/// Closes out a job: terminal status, progress 100, result and error.
pub fn finish(
    db: &Database,
    id: i64,
    status: JobStatus,
    result: Option<String>,
    error: Option<String>,
) -> Result<(), DatabaseError> {
    update(db, id, &finish_update(status, result, error))
}

/// Returns the oldest pending job without claiming it.
pub fn oldest_pending(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Compare-and-set: moves job `id` to `processing` only if it is still
/// `pending`. Returns whether this caller won the claim.
pub fn claim(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', progress = 0, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now_timestamp()],
        )?;
        Ok(changed == 1)
    })
}

/// Atomically claims the oldest pending job (FIFO by creation time, then id).
///
/// Selection and the status flip happen in one statement, so concurrent
/// workers on the same database never receive the same job.
pub fn claim_next(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE jobs SET status = 'processing', progress = 0, updated_at = ?1
                 WHERE id = (
                     SELECT id FROM jobs WHERE status = 'pending'
                     ORDER BY created_at ASC, id ASC LIMIT 1
                 ) AND status = 'pending'
                 RETURNING *",
                params![now_timestamp()],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds a job by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists jobs newest first.
pub fn list(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref uploader) = filter.uploader_name {
            conditions.push(format!("uploader_name = ?{}", param_values.len() + 1));
            param_values.push(Box::new(uploader.clone()));
        }
        if let Some(batch_id) = filter.batch_id {
            conditions.push(format!("batch_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(batch_id));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(DEFAULT_LIST_LIMIT) as i64;
        param_values.push(Box::new(limit));
        let sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{}",
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
