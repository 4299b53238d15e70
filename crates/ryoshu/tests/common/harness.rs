//! Test harness for isolated end-to-end runs of the poll loop.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use ryoshu::db::job_repo::{self, JobRow};
use ryoshu::db::receipt_repo::{self, ReceiptRow};
use ryoshu::extraction::{CompletionClient, Extractor};
use ryoshu::processor::TextRecognizer;
use ryoshu::retrieval::{ObjectStore, Retriever};
use ryoshu::{BackoffPolicy, Database, JobProgressBroadcaster, Pipeline, PipelineConfig, PollLoop};

/// In-memory database plus scratch directories for one test.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Local receipt images live here.
    pub input_dir: PathBuf,
    /// Downloads from the object store land here.
    pub download_dir: PathBuf,
    pub db: Database,
    pub broadcaster: JobProgressBroadcaster,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let download_dir = temp_dir.path().join("downloads");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&download_dir).expect("Failed to create download dir");

        Self {
            temp_dir,
            input_dir,
            download_dir,
            db: Database::open_in_memory().expect("Failed to open database"),
            broadcaster: JobProgressBroadcaster::default(),
        }
    }

    /// Writes a fake image and returns its path as a job reference.
    pub fn image(&self, name: &str) -> String {
        let path = self.input_dir.join(name);
        std::fs::write(&path, b"\xff\xd8\xff fake jpeg").expect("Failed to write image");
        path.to_string_lossy().into_owned()
    }

    /// Queues one batch for `uploader` and returns the job ids.
    pub fn enqueue(&self, uploader: &str, files: &[String]) -> Vec<i64> {
        let (_, ids) =
            job_repo::enqueue_batch(&self.db, uploader, files).expect("Failed to enqueue");
        ids
    }

    pub fn pipeline(
        &self,
        ocr: Arc<dyn TextRecognizer>,
        llm: Arc<dyn CompletionClient>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Pipeline {
        let config = PipelineConfig {
            retrieval_timeout: Duration::from_secs(5),
            ocr_timeout: Duration::from_secs(5),
            llm_timeout: Duration::from_secs(5),
            ..PipelineConfig::default()
        };
        Pipeline::new(
            Arc::new(config),
            Retriever::new(store, &self.download_dir),
            ocr,
            Extractor::new(llm, "gpt-3.5-turbo", 0.0),
        )
    }

    pub fn poll_loop(&self, pipeline: Pipeline) -> PollLoop {
        PollLoop::new(
            self.db.clone(),
            Some(Arc::new(pipeline)),
            self.broadcaster.clone(),
            Duration::from_millis(10),
            BackoffPolicy::Fixed(Duration::from_millis(10)),
        )
    }

    pub fn job(&self, id: i64) -> JobRow {
        job_repo::find_by_id(&self.db, id)
            .expect("Failed to query job")
            .expect("Job not found")
    }

    pub fn receipts(&self) -> Vec<ReceiptRow> {
        receipt_repo::list(&self.db, None, 100).expect("Failed to list receipts")
    }

    pub fn download_dir_entries(&self) -> usize {
        std::fs::read_dir(&self.download_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}
