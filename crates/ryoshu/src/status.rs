//! Scoped job snapshots and the frames pushed over status streams.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::job_repo::{self, JobFilter, JobRow, DEFAULT_LIST_LIMIT};
use crate::db::{Database, DatabaseError};

/// Who is looking. Non-admins only see their own jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub uploader_name: String,
    pub is_admin: bool,
}

impl Viewer {
    pub fn new(uploader_name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            uploader_name: uploader_name.into(),
            is_admin,
        }
    }

    /// Uploader filter for queries, `None` for admins.
    pub fn scope(&self) -> Option<&str> {
        if self.is_admin {
            None
        } else {
            Some(&self.uploader_name)
        }
    }

    pub fn can_see(&self, uploader_name: &str) -> bool {
        self.is_admin || self.uploader_name == uploader_name
    }
}

/// One event on a status stream. Serialized as
/// `{"type": "...", "jobs"?: [...], "message"?: "...", "timestamp"?: "..."}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusFrame {
    Connected {
        message: String,
    },
    JobsUpdate {
        jobs: Vec<JobRow>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl StatusFrame {
    pub fn connected() -> Self {
        StatusFrame::Connected {
            message: "Connected to job status stream".to_string(),
        }
    }

    pub fn jobs(jobs: Vec<JobRow>) -> Self {
        StatusFrame::JobsUpdate {
            jobs,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusFrame::Error {
            message: message.into(),
        }
    }
}

/// Current jobs visible to `viewer`, newest first. `limit` is capped at
/// [`DEFAULT_LIST_LIMIT`].
pub fn snapshot(db: &Database, viewer: &Viewer, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    job_repo::list(
        db,
        &JobFilter {
            uploader_name: viewer.scope().map(str::to_string),
            limit: Some(limit.min(DEFAULT_LIST_LIMIT)),
            ..Default::default()
        },
    )
}

/// Snapshot wrapped as a frame; a query failure becomes an `error` frame.
pub fn snapshot_frame(db: &Database, viewer: &Viewer, limit: u64) -> StatusFrame {
    match snapshot(db, viewer, limit) {
        Ok(jobs) => StatusFrame::jobs(jobs),
        Err(e) => {
            log::error!("Status snapshot for {} failed: {}", viewer.uploader_name, e);
            StatusFrame::error("Failed to fetch jobs")
        }
    }
}
