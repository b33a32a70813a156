//! Remote object-store delivery backend (HTTP PUT).

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::{Result, UploadError, UploadedFile, Uploader};

/// PUTs finished recordings to an HTTP object store endpoint.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUploader {
    pub fn new(endpoint: &str) -> Result<Self> {
        // A trailing slash keeps Url::join from replacing the last segment.
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| UploadError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, local_path: &Path, storage_path: &str) -> Result<UploadedFile> {
        let target = self
            .base_url
            .join(storage_path)
            .map_err(|e| UploadError::InvalidEndpoint(format!("{storage_path}: {e}")))?;

        let body = tokio::fs::read(local_path).await?;
        let size = body.len() as u64;

        let response = self.client.put(target.clone()).body(body).send().await?;
        if !response.status().is_success() {
            return Err(UploadError::Rejected {
                status: response.status(),
            });
        }

        debug!(target: "tabcast.upload", to = %target, size, "recording uploaded");
        Ok(UploadedFile {
            location: target.into(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_joins_under_the_endpoint() {
        let uploader = HttpUploader::new("https://store.example.com/recordings").unwrap();
        let target = uploader.base_url.join("room/session-1.mp4").unwrap();
        assert_eq!(
            target.as_str(),
            "https://store.example.com/recordings/room/session-1.mp4"
        );
    }

    #[test]
    fn unparseable_endpoint_is_rejected() {
        assert!(matches!(
            HttpUploader::new("not a url"),
            Err(UploadError::InvalidEndpoint(_))
        ));
    }
}
