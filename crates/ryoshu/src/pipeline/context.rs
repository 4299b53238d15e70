use crate::db::job_repo::JobRow;
use crate::retrieval::RetrievedFile;

/// State carried between pipeline steps for one job.
///
/// Owns the retrieved file, so a downloaded copy lives exactly as long as
/// the run that needs it and is removed on every exit path.
pub struct PipelineContext {
    pub job: JobRow,

    // Step 1 result
    pub file: Option<RetrievedFile>,
}

impl PipelineContext {
    pub fn new(job: JobRow) -> Self {
        Self { job, file: None }
    }
}
