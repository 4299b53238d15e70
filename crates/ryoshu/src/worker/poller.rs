//! The poll loop: claims one pending job at a time and runs it to a
//! terminal state.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster};
use crate::config::Config;
use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::{RyoshuError, WorkerError};
use crate::job::JobStatus;
use crate::pipeline::{self, Outcome, Pipeline, ProgressEvent, ProgressReporter, StoreProgress};

use super::backoff::{Backoff, BackoffPolicy};

/// Result of one finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: i64,
    pub status: JobStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// No pending job.
    Idle,
    /// No LLM credential; nothing was claimed.
    Degraded,
    Processed(JobReport),
}

pub struct PollLoop {
    db: Database,
    /// `None` runs the loop in degraded mode.
    pipeline: Option<Arc<Pipeline>>,
    broadcaster: JobProgressBroadcaster,
    poll_interval: Duration,
    backoff: Backoff,
    degraded_log_interval: Duration,
    last_degraded_log: Option<Instant>,
}

impl PollLoop {
    pub fn new(
        db: Database,
        pipeline: Option<Arc<Pipeline>>,
        broadcaster: JobProgressBroadcaster,
        poll_interval: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            db,
            pipeline,
            broadcaster,
            poll_interval,
            backoff: Backoff::new(backoff),
            degraded_log_interval: Duration::from_secs(60),
            last_degraded_log: None,
        }
    }

    /// Builds the loop from config. A missing or unreadable LLM credential
    /// yields a degraded loop instead of an error.
    pub fn from_config(
        config: &Config,
        db: Database,
        broadcaster: JobProgressBroadcaster,
    ) -> Result<Self, RyoshuError> {
        let api_key = match config.llm.api_key.resolve() {
            Ok(key) => key,
            Err(e) => {
                warn!("Could not resolve LLM API key: {}", e);
                None
            }
        };

        let pipeline = match api_key {
            Some(key) => Some(Arc::new(Pipeline::from_config(config, key)?)),
            None => None,
        };

        let mut poll_loop = Self::new(
            db,
            pipeline,
            broadcaster,
            config.worker.poll_interval(),
            BackoffPolicy::from_config(&config.worker.backoff),
        );
        poll_loop.degraded_log_interval = config.worker.degraded_log_interval();
        Ok(poll_loop)
    }

    pub fn is_degraded(&self) -> bool {
        self.pipeline.is_none()
    }

    /// One iteration: claim the oldest pending job, run it, persist the
    /// outcome. A job claimed here always ends `done` or `failed` unless
    /// the database itself fails.
    pub async fn tick(&mut self) -> Result<Tick, WorkerError> {
        let Some(pipeline) = self.pipeline.clone() else {
            self.log_degraded();
            return Ok(Tick::Degraded);
        };

        let Some(job) = job_repo::claim_next(&self.db)? else {
            return Ok(Tick::Idle);
        };
        info!("Processing job {} for {}", job.id, job.uploader_name);

        let reporter = Arc::new(StoreProgress::new(
            self.db.clone(),
            &self.broadcaster,
            job.id,
            &job.uploader_name,
        ));
        reporter.report(ProgressEvent::Checkpoint {
            phase: JobPhase::Claimed,
            progress: 0,
        });

        let outcome = run_isolated(pipeline, &job, Arc::clone(&reporter)).await;
        let persisted = pipeline::persist(&self.db, &job, &outcome)?;

        match persisted.status {
            JobStatus::Done => {
                info!("Job {} done", job.id);
                reporter.report(ProgressEvent::Completed);
            }
            _ => {
                let error = persisted.error.clone().unwrap_or_default();
                warn!("Job {} failed: {}", job.id, error);
                reporter.report(ProgressEvent::Failed { error });
            }
        }

        Ok(Tick::Processed(JobReport {
            job_id: job.id,
            status: persisted.status,
            error: persisted.error,
        }))
    }

    /// Polls until `shutdown` turns true or its sender is dropped. The job in
    /// flight when shutdown arrives is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Poll loop started (interval {:?}{})",
            self.poll_interval,
            if self.is_degraded() { ", degraded" } else { "" }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(Tick::Processed(_)) => {
                    self.backoff.reset();
                    continue;
                }
                Ok(Tick::Idle) | Ok(Tick::Degraded) => {
                    self.backoff.reset();
                    self.poll_interval
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    error!("Poll loop error: {}; retrying in {:?}", e, delay);
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Poll loop stopped");
    }

    fn log_degraded(&mut self) {
        let now = Instant::now();
        let due = self
            .last_degraded_log
            .map_or(true, |last| now.duration_since(last) >= self.degraded_log_interval);
        if due {
            warn!("No LLM API key configured; pending jobs are not being processed");
            self.last_degraded_log = Some(now);
        } else {
            debug!("Degraded mode: skipping poll");
        }
    }
}

/// Runs the pipeline on its own task so a panic fails the job instead of
/// the loop.
async fn run_isolated(
    pipeline: Arc<Pipeline>,
    job: &JobRow,
    reporter: Arc<StoreProgress>,
) -> Outcome {
    let task_job = job.clone();
    let handle =
        tokio::spawn(async move { pipeline.run(&task_job, reporter.as_ref()).await });

    match handle.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!("Pipeline task for job {} panicked", job.id);
            Outcome::SystemFailure {
                message: WorkerError::TaskPanicked { job_id: job.id }.to_string(),
            }
        }
        Err(_) => Outcome::SystemFailure {
            message: WorkerError::TaskCancelled { job_id: job.id }.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::NewJob;

    fn pending(db: &Database) -> i64 {
        job_repo::create_job(
            db,
            &NewJob {
                uploader_name: "u1".to_string(),
                file_path: "/tmp/r.jpg".to_string(),
                batch_id: None,
            },
        )
        .unwrap()
    }

    fn degraded_loop(db: &Database) -> PollLoop {
        PollLoop::new(
            db.clone(),
            None,
            JobProgressBroadcaster::default(),
            Duration::from_millis(10),
            BackoffPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_degraded_loop_claims_nothing() {
        let db = Database::open_in_memory().unwrap();
        let id = pending(&db);
        let mut poll_loop = degraded_loop(&db);

        assert!(poll_loop.is_degraded());
        assert_eq!(poll_loop.tick().await.unwrap(), Tick::Degraded);
        assert_eq!(poll_loop.tick().await.unwrap(), Tick::Degraded);

        let row = job_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_degraded_warning_is_rate_limited() {
        let db = Database::open_in_memory().unwrap();
        let mut poll_loop = degraded_loop(&db);

        poll_loop.log_degraded();
        let first = poll_loop.last_degraded_log;
        poll_loop.log_degraded();
        assert_eq!(poll_loop.last_degraded_log, first);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let poll_loop = degraded_loop(&db);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let db = Database::open_in_memory().unwrap();
        let poll_loop = degraded_loop(&db);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop.run(rx));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_from_config_without_key_is_degraded() {
        std::env::remove_var("RYOSHU_TEST_MISSING_KEY");
        let mut config = Config::default();
        config.llm.api_key = crate::secrets::SecretRef::from_env("RYOSHU_TEST_MISSING_KEY");

        let db = Database::open_in_memory().unwrap();
        let poll_loop =
            PollLoop::from_config(&config, db, JobProgressBroadcaster::default()).unwrap();
        assert!(poll_loop.is_degraded());
    }

    #[tokio::test]
    async fn test_from_config_with_key_is_active() {
        let mut config = Config::default();
        config.llm.api_key = crate::secrets::SecretRef {
            value: Some("sk-test".to_string()),
            ..Default::default()
        };

        let db = Database::open_in_memory().unwrap();
        let poll_loop =
            PollLoop::from_config(&config, db, JobProgressBroadcaster::default()).unwrap();
        assert!(!poll_loop.is_degraded());
    }
}
