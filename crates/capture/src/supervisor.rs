//! Provisioning supervisor: bounded browser launch retries.
//!
//! Browser launch failures are frequently transient (resource contention,
//! display-server races, flaky network on the first page fetch), so each
//! launch+navigate unit gets a bounded number of attempts with a fixed delay
//! in between. Every attempt is additionally raced against a wall-clock bound
//! that is wider than the navigation's own timeout, because the launch path
//! can hang in places that timeout does not cover.

use tracing::{info, warn};

use crate::chrome::{BrowserHandle, BrowserLauncher, LaunchContext, handle_slot};
use crate::config::RetryPolicy;
use crate::error::{CaptureError, Result};
use crate::events::EventSender;

/// Runs launch+navigate attempts until one succeeds or the policy is
/// exhausted.
///
/// Invariants: a failed attempt's browser handle is fully closed before the
/// next attempt launches (no two browser processes per controller), and a
/// timed-out unit is dropped where it stands — its process is reaped through
/// the handle left in the slot or by the launcher's own drop guards.
pub async fn provision(
    launcher: &dyn BrowserLauncher,
    ctx: &LaunchContext,
    events: &EventSender,
    policy: &RetryPolicy,
) -> Result<Box<dyn BrowserHandle>> {
    let mut last_error = CaptureError::ChromeFailedToStart("no attempts were made".into());

    for attempt in 1..=policy.max_attempts {
        let slot = handle_slot();
        let unit = launcher.launch(ctx, events.clone(), &slot);
        let outcome = tokio::select! {
            result = unit => result,
            _ = tokio::time::sleep(policy.attempt_timeout) => Err(CaptureError::timed_out()),
        };

        match outcome {
            Ok(()) => {
                let handle = slot.lock().take();
                match handle {
                    Some(handle) => {
                        info!(target: "tabcast.supervisor", attempt, "browser session ready");
                        return Ok(handle);
                    }
                    // Launcher contract violation, not a page problem.
                    None => {
                        last_error = CaptureError::ChromeFailedToStart(
                            "launcher completed without publishing a session handle".into(),
                        );
                        warn!(target: "tabcast.supervisor", attempt, "empty handle slot after successful launch");
                    }
                }
            }
            Err(err) => {
                let abandoned = slot.lock().take();
                if let Some(mut handle) = abandoned {
                    handle.close().await;
                }
                warn!(target: "tabcast.supervisor", attempt, error = %err, "failed to launch chrome");
                last_error = err;
            }
        }

        if attempt < policy.max_attempts {
            info!(target: "tabcast.supervisor", attempt = attempt + 1, "retrying chrome launch");
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    Err(CaptureError::ExhaustedRetries {
        attempts: policy.max_attempts,
        source: Box::new(last_error),
    })
}
