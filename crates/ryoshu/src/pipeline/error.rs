use std::time::Duration;

use thiserror::Error;

/// Job-scoped failures. Each ends the job as `failed` with this message.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] crate::retrieval::RetrievalError),

    #[error("{0}")]
    Ocr(#[from] crate::error::ProcessError),

    #[error("EmptyOcrResult: OCR returned no text for this image")]
    EmptyOcrResult,

    #[error("{0}")]
    Extraction(#[from] crate::extraction::ExtractionError),

    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}
