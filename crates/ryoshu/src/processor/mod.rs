//! OCR stage: turns a receipt image into raw text.

pub mod ocr;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{OcrConfig, OcrEngine};
use crate::error::ProcessError;

pub use ocr::TesseractCli;
#[cfg(feature = "tesseract")]
pub use ocr::LeptessRecognizer;

/// Recognizes text in an image file.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<String, ProcessError>;
}

/// Builds the recognizer selected in config.
pub fn recognizer_from_config(config: &OcrConfig) -> Result<Arc<dyn TextRecognizer>, ProcessError> {
    match config.engine {
        OcrEngine::TesseractCli => Ok(Arc::new(TesseractCli::new(
            &config.tesseract_path,
            &config.language,
        ))),
        #[cfg(feature = "tesseract")]
        OcrEngine::Leptess => Ok(Arc::new(LeptessRecognizer::new(&config.language))),
        #[cfg(not(feature = "tesseract"))]
        OcrEngine::Leptess => Err(ProcessError::EngineUnavailable {
            engine: "leptess",
            reason: "built without the `tesseract` feature".to_string(),
        }),
    }
}
