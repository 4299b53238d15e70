use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::broadcast::job_progress::JobPhase;
use crate::config::Config;
use crate::db::job_repo::JobRow;
use crate::error::{ConfigError, RyoshuError};
use crate::extraction::{self, Extractor, OpenAiClient, Rejection};
use crate::processor::{self, TextRecognizer};
use crate::retrieval::{HttpObjectStore, ObjectStore, Retriever};
use crate::sanitize;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::outcome::Outcome;
use super::progress::{ProgressEvent, ProgressReporter};

pub const PROGRESS_OCR_STARTED: u8 = 10;
pub const PROGRESS_OCR_DONE: u8 = 40;
pub const PROGRESS_LLM_DONE: u8 = 70;

/// Retrieval → OCR → extraction for one job.
///
/// Never fails: every job-scoped error becomes an [`Outcome`]. Persisting
/// the outcome is the caller's job.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    retriever: Retriever,
    recognizer: Arc<dyn TextRecognizer>,
    extractor: Extractor,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        retriever: Retriever,
        recognizer: Arc<dyn TextRecognizer>,
        extractor: Extractor,
    ) -> Self {
        Self {
            config,
            retriever,
            recognizer,
            extractor,
        }
    }

    /// Production constructor: builds every stage from config.
    pub fn from_config(config: &Config, api_key: SecretString) -> Result<Self, RyoshuError> {
        let token = config
            .storage
            .token
            .resolve()
            .map_err(|e| ConfigError::Secret {
                name: "storage.token",
                source: e,
            })?;
        let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
            config.storage.region.clone(),
            config.storage.endpoint.clone(),
            token,
            Duration::from_secs(config.storage.timeout_secs),
        )?);
        let retriever = Retriever::new(Some(store), config.storage.resolved_temp_dir())
            .with_bucket(config.storage.bucket.clone());

        let recognizer = processor::recognizer_from_config(&config.ocr)?;

        let client = OpenAiClient::new(
            &config.llm.base_url,
            api_key,
            Duration::from_secs(config.llm.timeout_secs),
        )?;
        let extractor = Extractor::new(
            Arc::new(client),
            config.llm.model.clone(),
            config.llm.temperature,
        );

        Ok(Self::new(
            Arc::new(PipelineConfig::from_config(config)),
            retriever,
            recognizer,
            extractor,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every stage for `job` and reports checkpoints along the way.
    pub async fn run(&self, job: &JobRow, progress: &dyn ProgressReporter) -> Outcome {
        let span = info_span!("pipeline",
            job_id = job.id,
            file = %sanitize::redact_reference(&job.file_path),
        );

        async {
            let mut ctx = PipelineContext::new(job.clone());
            let outcome = match self.execute(&mut ctx, progress).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Job failed");
                    Outcome::SystemFailure {
                        message: e.to_string(),
                    }
                }
            };
            // Dropping the context removes any downloaded copy.
            drop(ctx);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<Outcome, PipelineError> {
        let path = self
            .step_retrieve(ctx, progress)
            .instrument(info_span!("retrieve"))
            .await?;

        let ocr_text = self
            .step_recognize(&path, progress)
            .instrument(info_span!("ocr"))
            .await?;

        let reply = self
            .step_extract(&ctx.job.uploader_name, &ocr_text, progress)
            .instrument(info_span!("extract", model = %self.config.model))
            .await?;

        Ok(Self::step_interpret(reply, ocr_text))
    }

    async fn step_retrieve(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<PathBuf, PipelineError> {
        progress.report(ProgressEvent::Checkpoint {
            phase: JobPhase::Retrieving,
            progress: 0,
        });

        let file = deadline(
            "download",
            self.config.retrieval_timeout,
            self.retriever.retrieve(&ctx.job.file_path),
        )
        .await?;

        let path = file.path().to_path_buf();
        ctx.file = Some(file);
        Ok(path)
    }

    async fn step_recognize(
        &self,
        path: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<String, PipelineError> {
        progress.report(ProgressEvent::Checkpoint {
            phase: JobPhase::Recognizing,
            progress: PROGRESS_OCR_STARTED,
        });

        let text = deadline(
            "OCR",
            self.config.ocr_timeout,
            self.recognizer.recognize(path),
        )
        .await?;

        if text.trim().is_empty() {
            return Err(PipelineError::EmptyOcrResult);
        }
        debug!(chars = text.chars().count(), "OCR complete");

        progress.report(ProgressEvent::Checkpoint {
            phase: JobPhase::Extracting,
            progress: PROGRESS_OCR_DONE,
        });
        Ok(text)
    }

    async fn step_extract(
        &self,
        uploader_name: &str,
        ocr_text: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<String, PipelineError> {
        let reply = deadline(
            "LLM request",
            self.config.llm_timeout,
            self.extractor.request(uploader_name, ocr_text),
        )
        .await?;

        progress.report(ProgressEvent::Checkpoint {
            phase: JobPhase::Persisting,
            progress: PROGRESS_LLM_DONE,
        });
        Ok(reply)
    }

    fn step_interpret(reply: String, ocr_text: String) -> Outcome {
        match extraction::interpret(&reply) {
            Ok(fields) => {
                info!(company = %fields.company_name, "Receipt extracted");
                Outcome::Success { fields, ocr_text }
            }
            Err(Rejection::NotJson { raw }) => {
                warn!("Model reply is not a JSON object");
                Outcome::ParseFailure { raw }
            }
            Err(Rejection::MissingFields { partial, missing }) => {
                warn!(missing = ?missing, "Model reply lacks required fields");
                Outcome::ValidationFailure { partial, missing }
            }
        }
    }
}

/// Runs `fut` under a deadline; a breach fails the named stage.
async fn deadline<T, E, F>(stage: &'static str, after: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Timeout { stage, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::extraction::{CompletionClient, CompletionRequest, ExtractionError};
    use crate::pipeline::progress::NoopProgress;
    use crate::job::JobStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedOcr(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedOcr {
        async fn recognize(&self, _image: &Path) -> Result<String, ProcessError> {
            Ok(self.0.to_string())
        }
    }

    struct HangingOcr;

    #[async_trait]
    impl TextRecognizer for HangingOcr {
        async fn recognize(&self, _image: &Path) -> Result<String, ProcessError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    struct CountingLlm {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for CountingLlm {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    #[derive(Default)]
    struct Recorded(Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Recorded {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    const VALID_REPLY: &str = r#"{"uploader_name":"u1","receipt_type":"grocery","date":"2024-01-01","company_name":"Test Co","price":"500"}"#;

    fn job(file_path: &str) -> JobRow {
        JobRow {
            id: 1,
            uploader_name: "u1".to_string(),
            file_path: file_path.to_string(),
            status: JobStatus::Processing,
            progress: 0,
            result: None,
            error: None,
            batch_id: None,
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn pipeline(ocr: Arc<dyn TextRecognizer>, llm: Arc<CountingLlm>) -> Pipeline {
        let config = PipelineConfig {
            ocr_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        };
        Pipeline::new(
            Arc::new(config),
            Retriever::new(None, std::env::temp_dir()),
            ocr,
            Extractor::new(llm, "gpt-3.5-turbo", 0.0),
        )
    }

    fn image() -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        std::fs::write(file.path(), b"fake image").unwrap();
        file
    }

    #[tokio::test]
    async fn test_success_reports_checkpoints_in_order() {
        let image = image();
        let llm = Arc::new(CountingLlm {
            reply: VALID_REPLY,
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(FixedOcr("コンビニ 500円")), llm.clone());
        let progress = Recorded::default();

        let outcome = pipeline
            .run(&job(image.path().to_str().unwrap()), &progress)
            .await;

        match outcome {
            Outcome::Success { fields, ocr_text } => {
                assert_eq!(fields.company_name, "Test Co");
                assert_eq!(ocr_text, "コンビニ 500円");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let checkpoints: Vec<u8> = progress
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Checkpoint { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(checkpoints, vec![0, 10, 40, 70]);
    }

    #[tokio::test]
    async fn test_blank_ocr_skips_extraction() {
        let image = image();
        let llm = Arc::new(CountingLlm {
            reply: VALID_REPLY,
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(FixedOcr(" \n\t ")), llm.clone());

        let outcome = pipeline
            .run(&job(image.path().to_str().unwrap()), &NoopProgress)
            .await;

        match outcome {
            Outcome::SystemFailure { message } => assert!(message.contains("EmptyOcrResult")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_ocr() {
        let llm = Arc::new(CountingLlm {
            reply: VALID_REPLY,
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(FixedOcr("text")), llm.clone());

        let outcome = pipeline
            .run(&job("/nonexistent/ryoshu/r.jpg"), &NoopProgress)
            .await;

        match outcome {
            Outcome::SystemFailure { message } => assert!(message.contains("File not found")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hanging_ocr_times_out() {
        let image = image();
        let llm = Arc::new(CountingLlm {
            reply: VALID_REPLY,
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(HangingOcr), llm);

        let outcome = pipeline
            .run(&job(image.path().to_str().unwrap()), &NoopProgress)
            .await;

        match outcome {
            Outcome::SystemFailure { message } => {
                assert_eq!(message, "OCR timed out after 200ms");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_reply_is_parse_failure() {
        let image = image();
        let llm = Arc::new(CountingLlm {
            reply: "I could not read the receipt.",
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(FixedOcr("text")), llm);

        let outcome = pipeline
            .run(&job(image.path().to_str().unwrap()), &NoopProgress)
            .await;

        assert_eq!(
            outcome,
            Outcome::ParseFailure {
                raw: "I could not read the receipt.".to_string()
            }
        );
    }
}
