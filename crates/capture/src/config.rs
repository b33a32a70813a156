//! Immutable capture configuration supplied at controller construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CaptureError, Result};

/// Virtual display geometry: width x height x color depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            depth: 24,
        }
    }
}

/// The page the browser is pointed at: either a complete URL, or a base URL
/// that gets the layout, websocket URL, and session token appended as query
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageTarget {
    Url { url: String },
    Composed {
        base_url: String,
        layout: String,
        ws_url: String,
        token: String,
    },
}

impl PageTarget {
    /// Resolves the target into the URL handed to the browser.
    pub fn resolve(&self) -> Result<String> {
        match self {
            PageTarget::Url { url } => Ok(url.clone()),
            PageTarget::Composed {
                base_url,
                layout,
                ws_url,
                token,
            } => {
                let mut url = Url::parse(base_url)
                    .map_err(|e| CaptureError::InvalidTarget(format!("{base_url}: {e}")))?;
                url.query_pairs_mut()
                    .append_pair("layout", layout)
                    .append_pair("url", ws_url)
                    .append_pair("token", token);
                Ok(url.into())
            }
        }
    }
}

/// Provisioning retry policy.
///
/// Attempt count and delays are policy constants, not load-bearing design, so
/// they are exposed here rather than hard-coded in the supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum launch+navigate attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between failed attempts.
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Hard wall-clock bound on one attempt. Must exceed `navigation_timeout`:
    /// it exists to catch hangs the navigation driver's own timeout does not
    /// cover (e.g. process start hangs).
    #[serde(with = "duration_secs")]
    pub attempt_timeout: Duration,
    /// Bound on the navigation itself within an attempt.
    #[serde(with = "duration_secs")]
    pub navigation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(45),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        f64::deserialize(d).map(Duration::from_secs_f64)
    }
}

/// Immutable configuration for one capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Stable identity string: names the audio sink and correlates logs.
    pub identity: String,
    /// Page the browser navigates to.
    pub target: PageTarget,
    #[serde(default)]
    pub geometry: Geometry,
    /// Run the browser with its OS sandbox enabled.
    #[serde(default)]
    pub enable_sandbox: bool,
    /// Relax web-security / mixed-content restrictions.
    #[serde(default)]
    pub allow_insecure: bool,
    /// Wait for the page's start sentinel before considering capture live.
    /// When unset, capture is considered started at construction.
    #[serde(default)]
    pub await_start_signal: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_resolves_unchanged() {
        let target = PageTarget::Url {
            url: "https://example.com/room?x=1".into(),
        };
        assert_eq!(target.resolve().unwrap(), "https://example.com/room?x=1");
    }

    #[test]
    fn composed_target_appends_query_parameters() {
        let target = PageTarget::Composed {
            base_url: "https://recorder.example.com/".into(),
            layout: "speaker".into(),
            ws_url: "wss://media.example.com".into(),
            token: "tok-123".into(),
        };
        let url = Url::parse(&target.resolve().unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("layout".into(), "speaker".into())));
        assert!(pairs.contains(&("url".into(), "wss://media.example.com".into())));
        assert!(pairs.contains(&("token".into(), "tok-123".into())));
    }

    #[test]
    fn composed_target_rejects_unparseable_base() {
        let target = PageTarget::Composed {
            base_url: "not a url".into(),
            layout: "grid".into(),
            ws_url: "wss://x".into(),
            token: "t".into(),
        };
        assert!(matches!(
            target.resolve(),
            Err(CaptureError::InvalidTarget(_))
        ));
    }

    #[test]
    fn default_policy_keeps_attempt_timeout_above_navigation_timeout() {
        let policy = RetryPolicy::default();
        assert!(policy.attempt_timeout > policy.navigation_timeout);
    }
}
