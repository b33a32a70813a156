//! Bounded retry with exponential backoff around a delivery backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{Result, UploadError, UploadedFile, Uploader};

/// Retry policy: attempts are spaced by a delay doubling from `min_delay`,
/// clamped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay inserted after the given 1-based failed attempt.
    fn delay_after(&self, attempt: u32) -> Duration {
        let doubled = self
            .min_delay
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }
}

/// Wraps a backend and retries transient delivery failures.
pub struct RetryingUploader<U> {
    inner: U,
    policy: BackoffPolicy,
}

impl<U> RetryingUploader<U> {
    pub fn new(inner: U, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<U: Uploader> Uploader for RetryingUploader<U> {
    async fn upload(&self, local_path: &Path, storage_path: &str) -> Result<UploadedFile> {
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.inner.upload(local_path, storage_path).await {
                Ok(uploaded) => return Ok(uploaded),
                Err(err) => {
                    warn!(target: "tabcast.upload", attempt, error = %err, "upload attempt failed");
                    last_error = Some(err);
                }
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(UploadError::ExhaustedRetries {
            attempts: self.policy.max_attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                UploadError::InvalidEndpoint("no attempts were made".into())
            })),
        })
    }
}
