pub mod backoff;
pub mod poller;

pub use backoff::{Backoff, BackoffPolicy};
pub use poller::{JobReport, PollLoop, Tick};
