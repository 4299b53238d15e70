pub mod config;
pub mod context;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use outcome::{persist, Outcome, Persisted};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, StoreProgress};
pub use runner::Pipeline;
