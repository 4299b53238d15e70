//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// No row with the given id.
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// A stored status string is not one of the known job states.
    #[error("Unknown job status '{status}' on job {id}")]
    UnknownStatus { id: i64, status: String },

    /// Status moves only pending -> processing -> done | failed.
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    /// A value could not be serialized for storage.
    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
