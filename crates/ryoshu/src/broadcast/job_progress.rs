//! Job progress broadcaster for real-time job status streaming.
//!
//! Events are a push hint only. The job store stays authoritative, so a
//! lagging or absent subscriber never loses state; it just waits for the
//! next snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobStatus;

/// Pipeline stage a job is in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Claimed,
    Retrieving,
    Recognizing,
    Extracting,
    Persisting,
    Done,
    Failed,
}

impl JobPhase {
    pub fn status(self) -> JobStatus {
        match self {
            JobPhase::Done => JobStatus::Done,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Claimed => write!(f, "Claimed"),
            JobPhase::Retrieving => write!(f, "Retrieving file"),
            JobPhase::Recognizing => write!(f, "Running OCR"),
            JobPhase::Extracting => write!(f, "Extracting fields"),
            JobPhase::Persisting => write!(f, "Saving receipt"),
            JobPhase::Done => write!(f, "Done"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: i64,
    /// Owner of the job; streams use it to filter events per viewer.
    pub uploader_name: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: i64, uploader_name: &str, phase: JobPhase, progress: u8) -> Self {
        Self {
            job_id,
            uploader_name: uploader_name.to_string(),
            phase,
            status: phase.status(),
            progress: progress.min(100),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(job_id: i64, uploader_name: &str, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, uploader_name, JobPhase::Failed, 100)
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one job.
    pub fn track(&self, job_id: i64, uploader_name: &str) -> JobProgressTracker {
        JobProgressTracker {
            job_id,
            uploader_name: uploader_name.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Sends events for a single job.
pub struct JobProgressTracker {
    job_id: i64,
    uploader_name: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn update_phase(&self, phase: JobPhase, progress: u8) {
        let event = JobProgressEvent::new(self.job_id, &self.uploader_name, phase, progress);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self) {
        self.update_phase(JobPhase::Done, 100);
    }

    pub fn failed(&self, error: &str) {
        let event = JobProgressEvent::failed(self.job_id, &self.uploader_name, error);
        let _ = self.sender.send(event);
    }
}
