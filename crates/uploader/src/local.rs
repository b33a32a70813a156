//! Local-directory delivery backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::{Result, UploadedFile, Uploader};

/// Copies finished recordings into a directory on this host.
#[derive(Debug, Clone)]
pub struct LocalUploader {
    root: PathBuf,
}

impl LocalUploader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(&self, local_path: &Path, storage_path: &str) -> Result<UploadedFile> {
        let destination = self.root.join(storage_path);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = tokio::fs::copy(local_path, &destination).await?;
        debug!(
            target: "tabcast.upload",
            from = %local_path.display(),
            to = %destination.display(),
            size,
            "recording stored locally",
        );

        Ok(UploadedFile {
            location: destination.display().to_string(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[tokio::test]
    async fn copies_into_nested_storage_path_and_reports_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("recording.mp4");
        tokio::fs::write(&source, b"not really video").await?;

        let uploader = LocalUploader::new(dir.path().join("out"));
        let uploaded = uploader.upload(&source, "room/session-1.mp4").await?;

        assert_eq!(uploaded.size, 16);
        let stored = tokio::fs::read(dir.path().join("out/room/session-1.mp4")).await?;
        assert_eq!(stored, b"not really video");
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_surfaces_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = LocalUploader::new(dir.path().to_path_buf());
        let err = uploader
            .upload(Path::new("/nonexistent/recording.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::UploadError::Io(_)));
    }
}
