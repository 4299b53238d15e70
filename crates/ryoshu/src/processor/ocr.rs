use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use super::TextRecognizer;
use crate::error::ProcessError;

/// Maximum stderr kept in an OCR failure message.
const MAX_STDERR_LENGTH: usize = 300;

/// Runs the `tesseract` binary and reads recognized text from stdout.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &Path) -> Result<String, ProcessError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::EngineUnavailable {
                        engine: "tesseract-cli",
                        reason: format!("'{}' not found on PATH", self.binary.display()),
                    }
                } else {
                    ProcessError::OcrFailed(format!("Failed to run tesseract: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_LENGTH).collect();
            return Err(ProcessError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status, stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// In-process recognition through libtesseract.
///
/// Images are decoded and re-encoded as PNG first so every format the
/// `image` crate reads is accepted regardless of the leptonica build.
#[cfg(feature = "tesseract")]
#[derive(Clone)]
pub struct LeptessRecognizer {
    inner: std::sync::Arc<LeptessInner>,
}

#[cfg(feature = "tesseract")]
struct LeptessInner {
    language: String,
}

#[cfg(feature = "tesseract")]
impl LeptessRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            inner: std::sync::Arc::new(LeptessInner {
                language: language.into(),
            }),
        }
    }

    pub fn recognize_bytes(&self, image_data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("ocr.leptess").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let mut png_data = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut png_data),
            image::ImageFormat::Png,
        )
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.inner.language).map_err(|e| {
            ProcessError::EngineUnavailable {
                engine: "leptess",
                reason: e.to_string(),
            }
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(e.to_string()))
    }
}

#[cfg(feature = "tesseract")]
#[async_trait]
impl TextRecognizer for LeptessRecognizer {
    async fn recognize(&self, image: &Path) -> Result<String, ProcessError> {
        let data = tokio::fs::read(image)
            .await
            .map_err(|e| ProcessError::ReadImage {
                path: image.to_path_buf(),
                source: e,
            })?;

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.recognize_bytes(&data))
            .await
            .map_err(|e| ProcessError::OcrFailed(format!("OCR task failed: {}", e)))?
    }
}
