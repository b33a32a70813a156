//! Error taxonomy for capture environment provisioning.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors surfaced while provisioning or operating a capture source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A supporting process (display server, audio sink) could not be started.
    ///
    /// Fatal for construction: these indicate environment misconfiguration
    /// rather than transient flakiness, so they are never retried.
    #[error("{component} process failed: {source}")]
    ProcessFailed {
        component: &'static str,
        #[source]
        source: io::Error,
    },

    /// The browser process itself failed to come up.
    #[error("chrome failed to start: {0}")]
    ChromeFailedToStart(String),

    /// Navigation timed out, the page reported an error, or the load failed.
    #[error("page load failed: {0}")]
    PageLoadFailed(String),

    /// The configured page target could not be composed into a URL.
    #[error("invalid capture target: {0}")]
    InvalidTarget(String),

    /// Every provisioning attempt failed; carries the last attempt's error.
    #[error("provisioning failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Browser-level failures are retried by the supervisor; everything else
    /// aborts construction immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::ChromeFailedToStart(_) | CaptureError::PageLoadFailed(_)
        )
    }

    pub(crate) fn timed_out() -> Self {
        CaptureError::PageLoadFailed("timed out".into())
    }
}
