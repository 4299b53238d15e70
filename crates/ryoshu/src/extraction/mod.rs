//! LLM-driven extraction of structured receipt fields from OCR text.

use std::sync::Arc;

use serde_json::Value;

mod client;
mod error;
mod fields;
mod prompt;

pub use client::{CompletionClient, CompletionRequest, OpenAiClient};
pub use error::{ExtractionError, Rejection};
pub use fields::{LineItem, ReceiptFields, REQUIRED_FIELDS};
pub use prompt::build_prompt;

/// Sends OCR text to a completion client with the fixed receipt prompt.
#[derive(Clone)]
pub struct Extractor {
    client: Arc<dyn CompletionClient>,
    model: String,
    temperature: f32,
}

impl Extractor {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the model's raw reply. Interpretation is left to [`interpret`]
    /// so callers can keep the raw text when it is rejected.
    pub async fn request(&self, uploader_name: &str, ocr_text: &str) -> Result<String, ExtractionError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: build_prompt(uploader_name, ocr_text),
            temperature: self.temperature,
        };
        self.client.complete(&request).await
    }
}

/// Strictly parses a model reply into receipt fields.
///
/// Anything that is not a JSON object is [`Rejection::NotJson`]. No
/// repair is attempted: code fences or prose around the object reject it.
pub fn interpret(raw: &str) -> Result<ReceiptFields, Rejection> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Model reply is not JSON: {}", e);
            return Err(Rejection::NotJson {
                raw: raw.to_string(),
            });
        }
    };

    let Some(object) = parsed.as_object() else {
        return Err(Rejection::NotJson {
            raw: raw.to_string(),
        });
    };

    ReceiptFields::from_object(object).map_err(|missing| Rejection::MissingFields {
        partial: parsed.clone(),
        missing,
    })
}
