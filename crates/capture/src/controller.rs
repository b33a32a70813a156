//! Public façade over the capture environment lifecycle.

use std::sync::Arc;
use std::time::SystemTime;

use rand::thread_rng;
use tracing::{error, info};

use crate::audio::AudioSinkHandle;
use crate::chrome::{BrowserHandle, BrowserLauncher, ChromeLauncher, LaunchContext};
use crate::config::CaptureConfig;
use crate::display::{DisplayHandle, DisplayId};
use crate::error::Result;
use crate::events;
use crate::resources::{HostResources, ResourceFactory};
use crate::signal::{CaptureSignal, RecordingSignalBridge, SignalPair};
use crate::supervisor;

struct TeardownState {
    browser: Option<Box<dyn BrowserHandle>>,
    display: Option<DisplayHandle>,
    sink: Option<AudioSinkHandle>,
}

/// A fully-provisioned capture source.
///
/// Owns the virtual display, the audio sink, and the browser session; the
/// downstream pipeline only ever sees the signal accessors and timestamps.
/// `new` either returns a ready controller or an error with nothing left
/// allocated — never anything in between.
pub struct CaptureSourceController {
    signals: SignalPair,
    resources: Arc<dyn ResourceFactory>,
    state: parking_lot::Mutex<TeardownState>,
}

impl std::fmt::Debug for CaptureSourceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSourceController").finish_non_exhaustive()
    }
}

impl CaptureSourceController {
    /// Provisions a capture source against the host's Xvfb, PulseAudio, and
    /// Chromium, with a randomly drawn display identifier.
    pub async fn new(config: CaptureConfig) -> Result<Self> {
        let display_id = DisplayId::random(&mut thread_rng());
        Self::with_parts(
            config,
            Arc::new(HostResources),
            Arc::new(ChromeLauncher),
            display_id,
        )
        .await
    }

    /// Fully-injectable constructor: resource layer, browser launcher, and
    /// display identifier are supplied by the caller.
    pub async fn with_parts(
        config: CaptureConfig,
        resources: Arc<dyn ResourceFactory>,
        launcher: Arc<dyn BrowserLauncher>,
        display_id: DisplayId,
    ) -> Result<Self> {
        // Resolve the target before allocating anything host-global.
        let url = config.target.resolve()?;

        let (events_tx, events_rx) = events::channel();
        let signals = RecordingSignalBridge::attach(events_rx, config.await_start_signal);

        let sink = match resources.create_audio_sink(&config.identity).await {
            Ok(sink) => sink,
            Err(err) => {
                error!(target: "tabcast.controller", error = %err, "failed to create pulse sink");
                return Err(err);
            }
        };

        let mut display = match resources.launch_display(display_id, config.geometry).await {
            Ok(display) => display,
            Err(err) => {
                error!(target: "tabcast.controller", error = %err, display = %display_id, "failed to launch xvfb");
                resources.destroy_audio_sink(&sink).await;
                return Err(err);
            }
        };

        let ctx = LaunchContext {
            url,
            display: display_id,
            sink_identity: config.identity.clone(),
            geometry: config.geometry,
            enable_sandbox: config.enable_sandbox,
            allow_insecure: config.allow_insecure,
            navigation_timeout: config.retry.navigation_timeout,
        };

        match supervisor::provision(launcher.as_ref(), &ctx, &events_tx, &config.retry).await {
            Ok(browser) => {
                info!(target: "tabcast.controller", identity = %config.identity, "capture source ready");
                Ok(Self {
                    signals,
                    resources,
                    state: parking_lot::Mutex::new(TeardownState {
                        browser: Some(browser),
                        display: Some(display),
                        sink: Some(sink),
                    }),
                })
            }
            Err(err) => {
                resources.terminate_display(&mut display).await;
                resources.destroy_audio_sink(&sink).await;
                Err(err)
            }
        }
    }

    /// The start-capture signal. Already fired when the configuration did not
    /// request an externally-gated start.
    pub fn await_start(&self) -> CaptureSignal {
        self.signals.start.clone()
    }

    /// The end-capture signal.
    pub fn await_end(&self) -> CaptureSignal {
        self.signals.end.clone()
    }

    /// Wall-clock time of this call, not of the sentinel. Callers needing
    /// event-accurate timing must timestamp at the signal transition.
    pub fn started_at(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Wall-clock time of this call, not of the sentinel.
    pub fn ended_at(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Tears down whatever subset of the environment exists, in reverse order
    /// of creation: browser, display, audio sink. Idempotent.
    pub async fn close(&self) {
        let (browser, display, sink) = {
            let mut state = self.state.lock();
            (state.browser.take(), state.display.take(), state.sink.take())
        };

        if let Some(mut browser) = browser {
            browser.close().await;
        }
        if let Some(mut display) = display {
            self.resources.terminate_display(&mut display).await;
        }
        if let Some(sink) = sink {
            self.resources.destroy_audio_sink(&sink).await;
        }
    }
}
