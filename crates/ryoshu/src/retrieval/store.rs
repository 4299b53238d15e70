//! Object storage backends.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::error::RetrievalError;
use super::reference::ObjectLocation;

pub type ByteStream = BoxStream<'static, Result<Bytes, RetrievalError>>;

/// Read access to an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, location: &ObjectLocation) -> Result<ByteStream, RetrievalError>;
}

/// Plain HTTPS GET against S3 or an S3-compatible endpoint.
///
/// Requests are not SigV4-signed: objects must be public, reachable through
/// a gateway that accepts the optional bearer token, or served by an
/// endpoint that authorizes by network.
pub struct HttpObjectStore {
    client: Client,
    region: String,
    endpoint: Option<String>,
    token: Option<SecretString>,
}

impl HttpObjectStore {
    pub fn new(
        region: impl Into<String>,
        endpoint: Option<String>,
        token: Option<SecretString>,
        connect_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RetrievalError::Download {
                location: "<client>".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            region: region.into(),
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            token,
        })
    }

    /// Path-style against a configured endpoint, virtual-hosted otherwise.
    pub fn object_url(&self, location: &ObjectLocation) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, location.bucket, location.key),
            None => {
                let region = location.region.as_deref().unwrap_or(&self.region);
                format!(
                    "https://{}.s3.{}.amazonaws.com/{}",
                    location.bucket, region, location.key
                )
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, location: &ObjectLocation) -> Result<ByteStream, RetrievalError> {
        let url = self.object_url(location);
        log::debug!("Fetching {}", crate::sanitize::redact_url(&url));

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let display = location.to_string();
        let response = request.send().await.map_err(|e| RetrievalError::Download {
            location: display.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Download {
                location: display,
                message: format!("storage returned HTTP {}", status.as_u16()),
            });
        }

        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| RetrievalError::Download {
                location: display.clone(),
                message: e.to_string(),
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(region: Option<&str>) -> ObjectLocation {
        ObjectLocation {
            bucket: "receipts".to_string(),
            key: "u1/r.jpg".to_string(),
            region: region.map(str::to_string),
        }
    }

    #[test]
    fn test_virtual_hosted_url_uses_default_region() {
        let store =
            HttpObjectStore::new("ap-northeast-1", None, None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.object_url(&location(None)),
            "https://receipts.s3.ap-northeast-1.amazonaws.com/u1/r.jpg"
        );
        assert_eq!(
            store.object_url(&location(Some("us-east-1"))),
            "https://receipts.s3.us-east-1.amazonaws.com/u1/r.jpg"
        );
    }

    #[test]
    fn test_endpoint_uses_path_style() {
        let store = HttpObjectStore::new(
            "us-east-1",
            Some("http://localhost:9000/".to_string()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            store.object_url(&location(None)),
            "http://localhost:9000/receipts/u1/r.jpg"
        );
    }
}
