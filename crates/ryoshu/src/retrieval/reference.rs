//! Parsing of job file references.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::error::RetrievalError;

/// An object in an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    /// Region named in a virtual-hosted URL, if any.
    pub region: Option<String>,
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Where a job's file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Local(PathBuf),
    Object(ObjectLocation),
}

static RE_VIRTUAL_HOSTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://(?P<bucket>[a-z0-9][a-z0-9.\-]*)\.s3(?:[.\-](?P<region>[a-z0-9\-]+))?\.amazonaws\.com/(?P<key>[^?#]+)$",
    )
    .unwrap()
});

impl FileRef {
    /// Classifies a stored `file_path`.
    ///
    /// `s3://bucket/key` and `https://bucket.s3[.region].amazonaws.com/key`
    /// are objects. Any other `http(s)` URL is rejected. Everything else is a
    /// local path.
    pub fn parse(reference: &str) -> Result<Self, RetrievalError> {
        let reference = reference.trim();

        if let Some(rest) = reference.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(FileRef::Object(ObjectLocation {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        region: None,
                    }))
                }
                _ => Err(RetrievalError::InvalidReference(reference.to_string())),
            };
        }

        if reference.starts_with("https://") || reference.starts_with("http://") {
            let Some(caps) = RE_VIRTUAL_HOSTED.captures(reference) else {
                return Err(RetrievalError::UnsupportedUrl(
                    crate::sanitize::redact_url(reference),
                ));
            };
            return Ok(FileRef::Object(ObjectLocation {
                bucket: caps["bucket"].to_string(),
                key: caps["key"].to_string(),
                region: caps.name("region").map(|m| m.as_str().to_string()),
            }));
        }

        Ok(FileRef::Local(PathBuf::from(reference)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileRef::Object(_))
    }
}
