use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RyoshuError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] crate::retrieval::RetrievalError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] crate::extraction::ExtractionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve secret '{name}': {source}")]
    Secret {
        name: &'static str,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to read image '{path}': {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("OCR engine '{engine}' is unavailable: {reason}")]
    EngineUnavailable { engine: &'static str, reason: String },

    #[error("OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("worker panicked while processing job {job_id}")]
    TaskPanicked { job_id: i64 },

    #[error("worker task for job {job_id} was cancelled")]
    TaskCancelled { job_id: i64 },
}

pub type Result<T> = std::result::Result<T, RyoshuError>;
