//! Retrieval stage: resolves a job's file reference to a local path.
//!
//! Remote objects are streamed into a uniquely named temporary file that is
//! deleted when the returned [`RetrievedFile`] is dropped, whichever way the
//! pipeline exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

mod error;
mod reference;
mod store;

pub use error::RetrievalError;
pub use reference::{FileRef, ObjectLocation};
pub use store::{ByteStream, HttpObjectStore, ObjectStore};

/// A file ready for OCR.
#[derive(Debug)]
pub enum RetrievedFile {
    Local(PathBuf),
    Temp(NamedTempFile),
}

impl RetrievedFile {
    pub fn path(&self) -> &Path {
        match self {
            RetrievedFile::Local(path) => path,
            RetrievedFile::Temp(file) => file.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, RetrievedFile::Temp(_))
    }
}

/// Resolves references against the local filesystem and an optional store.
#[derive(Clone)]
pub struct Retriever {
    store: Option<Arc<dyn ObjectStore>>,
    temp_dir: PathBuf,
    bucket: Option<String>,
}

impl Retriever {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            temp_dir: temp_dir.into(),
            bucket: None,
        }
    }

    /// Restricts remote references to one bucket.
    pub fn with_bucket(mut self, bucket: Option<String>) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn retrieve(&self, reference: &str) -> Result<RetrievedFile, RetrievalError> {
        match FileRef::parse(reference)? {
            FileRef::Local(path) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Ok(RetrievedFile::Local(path)),
                _ => Err(RetrievalError::NotFound(path)),
            },
            FileRef::Object(location) => {
                if let Some(bucket) = &self.bucket {
                    if *bucket != location.bucket {
                        return Err(RetrievalError::ForeignBucket(location.bucket));
                    }
                }
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| RetrievalError::NotConfigured(location.to_string()))?;
                self.download(store.as_ref(), &location).await
            }
        }
    }

    async fn download(
        &self,
        store: &dyn ObjectStore,
        location: &ObjectLocation,
    ) -> Result<RetrievedFile, RetrievalError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let suffix = Path::new(&location.key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix("ryoshu-")
            .suffix(&suffix)
            .tempfile_in(&self.temp_dir)?;

        // `temp` owns the path; dropping it on any early return removes the file.
        let mut writer = tokio::fs::File::from_std(temp.as_file().try_clone()?);
        let mut stream = store.fetch(location).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.sync_all().await?;

        if written == 0 {
            return Err(RetrievalError::Download {
                location: location.to_string(),
                message: "object is empty".to_string(),
            });
        }

        log::debug!(
            "Downloaded {} bytes to {}",
            written,
            crate::sanitize::redact_path(temp.path())
        );
        Ok(RetrievedFile::Temp(temp))
    }
}
