use std::path::PathBuf;

use thiserror::Error;

/// Failures locating or fetching the file behind a job.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported URL (only S3 object references are accepted): {0}")]
    UnsupportedUrl(String),

    #[error("Invalid object reference '{0}': expected s3://bucket/key")]
    InvalidReference(String),

    #[error("Bucket '{0}' is not the configured storage bucket")]
    ForeignBucket(String),

    #[error("Object storage is not configured; cannot fetch {0}")]
    NotConfigured(String),

    #[error("Failed to download {location}: {message}")]
    Download { location: String, message: String },

    #[error("IO error while staging download: {0}")]
    Io(#[from] std::io::Error),
}
