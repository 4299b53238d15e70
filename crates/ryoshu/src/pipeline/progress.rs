use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster, JobProgressTracker};
use crate::db::job_repo::{self, JobUpdate};
use crate::db::Database;

/// Events emitted while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Checkpoint { phase: JobPhase, progress: u8 },
    Completed,
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Persists checkpoints to the job row and mirrors every event onto the
/// broadcast channel.
///
/// Terminal events are broadcast only; the persistence stage owns the
/// final write.
pub struct StoreProgress {
    db: Database,
    tracker: JobProgressTracker,
}

impl StoreProgress {
    pub fn new(
        db: Database,
        broadcaster: &JobProgressBroadcaster,
        job_id: i64,
        uploader_name: &str,
    ) -> Self {
        Self {
            db,
            tracker: broadcaster.track(job_id, uploader_name),
        }
    }
}

impl ProgressReporter for StoreProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Checkpoint { phase, progress } => {
                let job_id = self.tracker.job_id();
                if let Err(e) = job_repo::update(&self.db, job_id, &JobUpdate::progress(progress)) {
                    log::warn!("Failed to record progress {} for job {}: {}", progress, job_id, e);
                }
                self.tracker.update_phase(phase, progress);
            }
            ProgressEvent::Completed => self.tracker.completed(),
            ProgressEvent::Failed { error } => self.tracker.failed(&error),
        }
    }
}
