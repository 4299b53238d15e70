pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod job;
pub mod pipeline;
pub mod processor;
pub mod retrieval;
pub mod sanitize;
pub mod secrets;
pub mod status;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_or_default, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ProcessError, Result, RyoshuError, WorkerError};
pub use job::JobStatus;
pub use pipeline::{Outcome, Pipeline, PipelineConfig, PipelineContext};
pub use secrets::{resolve_secret, SecretError, SecretRef};
pub use status::{StatusFrame, Viewer};
pub use worker::{BackoffPolicy, PollLoop, Tick};
