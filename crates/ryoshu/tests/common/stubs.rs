//! Stub collaborators standing in for tesseract, the LLM API and S3.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};

use ryoshu::error::ProcessError;
use ryoshu::extraction::{CompletionClient, CompletionRequest, ExtractionError};
use ryoshu::processor::TextRecognizer;
use ryoshu::retrieval::{ByteStream, ObjectLocation, ObjectStore, RetrievalError};

/// A well-formed model reply for a 500 yen convenience-store receipt.
pub const VALID_REPLY: &str = r#"{"uploader_name":"u1","receipt_type":"convenience store","date":"2024-01-01","company_name":"Test Co","price":"500"}"#;

/// Returns the same text for every image.
pub struct FixedOcr(pub String);

impl FixedOcr {
    pub fn new(text: &str) -> Self {
        Self(text.to_string())
    }
}

#[async_trait]
impl TextRecognizer for FixedOcr {
    async fn recognize(&self, _image: &Path) -> Result<String, ProcessError> {
        Ok(self.0.clone())
    }
}

/// Panics when asked to recognize anything.
pub struct PanickingOcr;

#[async_trait]
impl TextRecognizer for PanickingOcr {
    async fn recognize(&self, _image: &Path) -> Result<String, ProcessError> {
        panic!("tesseract segfaulted");
    }
}

/// Replies from a script in call order, repeating the last entry, and
/// records every prompt it receives.
pub struct ScriptedLlm {
    replies: Vec<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(reply: &str) -> Self {
        Self::sequence(&[reply])
    }

    pub fn sequence(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let reply = self
            .replies
            .get(call)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(reply)
    }
}

/// Object store serving canned chunks; an `Err` chunk fails the stream there.
pub struct CannedStore {
    chunks: Vec<Result<&'static [u8], &'static str>>,
}

impl CannedStore {
    pub fn serving(body: &'static [u8]) -> Self {
        Self {
            chunks: vec![Ok(body)],
        }
    }

    /// Sends some bytes, then breaks the connection.
    pub fn broken() -> Self {
        Self {
            chunks: vec![Ok(&b"\xff\xd8\xff partial jpeg"[..]), Err("connection reset")],
        }
    }
}

#[async_trait]
impl ObjectStore for CannedStore {
    async fn fetch(&self, location: &ObjectLocation) -> Result<ByteStream, RetrievalError> {
        let location = location.to_string();
        let chunks: Vec<Result<Bytes, RetrievalError>> = self
            .chunks
            .iter()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(Bytes::from_static(bytes)),
                Err(message) => Err(RetrievalError::Download {
                    location: location.clone(),
                    message: message.to_string(),
                }),
            })
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
