//! Extraction error types.

use thiserror::Error;

/// Failures talking to the completion endpoint.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("LLM API key is not configured")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response contained no message content")]
    EmptyResponse,
}

/// Why a syntactically received response could not become a receipt.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Not a JSON object. Carries the raw text verbatim.
    NotJson { raw: String },
    /// A JSON object lacking required keys. Carries the parsed object.
    MissingFields {
        partial: serde_json::Value,
        missing: Vec<String>,
    },
}
