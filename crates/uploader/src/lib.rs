//! tabcast-uploader: moves a finished recording to its final location.
//!
//! The capture pipeline hands over a local file path and a storage path; the
//! selected backend (local directory or remote HTTP store) attempts delivery
//! with bounded retries and reports where the file ended up and how large it
//! is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod local;
pub mod retry;

pub use http::HttpUploader;
pub use local::LocalUploader;
pub use retry::{BackoffPolicy, RetryingUploader};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected with status {status}")]
    Rejected { status: reqwest::StatusCode },

    #[error("invalid upload endpoint: {0}")]
    InvalidEndpoint(String),

    /// Delivery gave up; carries the last attempt's error.
    #[error("upload failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },
}

/// Where a delivered recording landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Final accessible location: a filesystem path or a URL.
    pub location: String,
    /// Size in bytes of the delivered file.
    pub size: u64,
}

/// Attempts delivery of a finished recording.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &Path, storage_path: &str) -> Result<UploadedFile>;
}

/// Backend selection for finished recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadDestination {
    /// Copy into a directory on this host.
    Local { root: PathBuf },
    /// PUT to a remote object store endpoint.
    Http { endpoint: String },
}

impl UploadDestination {
    /// Builds the configured backend wrapped in the default retry policy.
    pub fn build(&self) -> Result<Box<dyn Uploader>> {
        Ok(match self {
            UploadDestination::Local { root } => Box::new(RetryingUploader::new(
                LocalUploader::new(root.clone()),
                BackoffPolicy::default(),
            )),
            UploadDestination::Http { endpoint } => Box::new(RetryingUploader::new(
                HttpUploader::new(endpoint)?,
                BackoffPolicy::default(),
            )),
        })
    }
}
