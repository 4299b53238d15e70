//! Job outcomes and the persistence stage.

use std::borrow::Cow;

use serde_json::Value;

use crate::db::job_repo::{self, JobRow};
use crate::db::receipt_repo::{self, NewReceipt};
use crate::db::{Database, DatabaseError};
use crate::extraction::ReceiptFields;
use crate::job::JobStatus;

pub const PARSE_FAILURE_MESSAGE: &str = "GPT parsing failed";

/// How a pipeline run ended.
///
/// Turned into the job's `result` and `error` strings only by [`persist`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        fields: ReceiptFields,
        ocr_text: String,
    },
    /// The model reply was not a JSON object; `raw` is kept verbatim.
    ParseFailure { raw: String },
    /// A JSON object lacking required keys.
    ValidationFailure {
        partial: Value,
        missing: Vec<String>,
    },
    /// Retrieval, OCR, transport, timeout or a crashed task.
    SystemFailure { message: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// The job `error` column for failures.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::ParseFailure { .. } => Some(PARSE_FAILURE_MESSAGE.to_string()),
            Outcome::ValidationFailure { missing, .. } => {
                Some(format!("Missing required fields: {}", missing.join(", ")))
            }
            Outcome::SystemFailure { message } => Some(message.clone()),
        }
    }

    /// The job `result` column.
    pub fn result_text(&self) -> Result<Option<String>, DatabaseError> {
        match self {
            Outcome::Success { fields, .. } => serde_json::to_string(fields)
                .map(Some)
                .map_err(|e| DatabaseError::Serialize {
                    what: "receipt fields",
                    source: e,
                }),
            Outcome::ParseFailure { raw } => Ok(Some(raw.clone())),
            Outcome::ValidationFailure { partial, .. } => Ok(Some(partial.to_string())),
            Outcome::SystemFailure { .. } => Ok(None),
        }
    }
}

/// What [`persist`] wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    pub status: JobStatus,
    pub error: Option<String>,
    pub receipt_id: Option<i64>,
}

/// Writes an outcome: the receipt row for a success, then the terminal job
/// state.
///
/// A success inserts the receipt and marks the job `done` in one
/// transaction. If that fails, the job is marked `failed` with the database
/// error and still keeps the serialized fields as its result.
///
/// The stored receipt and result always carry the job's uploader, whatever
/// name the model echoed back.
pub fn persist(
    db: &Database,
    job: &JobRow,
    outcome: &Outcome,
) -> Result<Persisted, DatabaseError> {
    let outcome = owned_by(job, outcome);
    let outcome = &*outcome;
    let result = outcome.result_text()?;

    if let Outcome::Success { fields, ocr_text } = outcome {
        let committed = db.with_transaction(|tx| {
            let receipt_id = receipt_repo::insert_in(
                tx,
                &NewReceipt {
                    job_id: job.id,
                    uploader_name: &job.uploader_name,
                    fields,
                    raw_ocr: ocr_text,
                    file_path: &job.file_path,
                },
            )?;
            job_repo::apply_update(
                tx,
                job.id,
                &job_repo::finish_update(JobStatus::Done, result.clone(), None),
            )?;
            Ok(receipt_id)
        });

        return match committed {
            Ok(receipt_id) => Ok(Persisted {
                status: JobStatus::Done,
                error: None,
                receipt_id: Some(receipt_id),
            }),
            Err(e) => {
                log::error!("Failed to save receipt for job {}: {}", job.id, e);
                let message = e.to_string();
                job_repo::finish(db, job.id, JobStatus::Failed, result, Some(message.clone()))?;
                Ok(Persisted {
                    status: JobStatus::Failed,
                    error: Some(message),
                    receipt_id: None,
                })
            }
        };
    }

    let error = outcome.error_message();
    job_repo::finish(db, job.id, JobStatus::Failed, result, error.clone())?;
    Ok(Persisted {
        status: JobStatus::Failed,
        error,
        receipt_id: None,
    })
}

fn owned_by<'a>(job: &JobRow, outcome: &'a Outcome) -> Cow<'a, Outcome> {
    match outcome {
        Outcome::Success { fields, ocr_text } if fields.uploader_name != job.uploader_name => {
            log::warn!(
                "Job {}: model returned uploader '{}', keeping job owner '{}'",
                job.id,
                fields.uploader_name,
                job.uploader_name
            );
            Cow::Owned(Outcome::Success {
                fields: ReceiptFields {
                    uploader_name: job.uploader_name.clone(),
                    ..fields.clone()
                },
                ocr_text: ocr_text.clone(),
            })
        }
        _ => Cow::Borrowed(outcome),
    }
}
