//! Recording boundary signals driven by in-page console sentinels.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventStream, PageEvent, scalar_text};

/// Sentinel the page logs to begin the recording window.
pub const START_RECORDING_SENTINEL: &str = "START_RECORDING";
/// Sentinel the page logs to end the recording window.
pub const END_RECORDING_SENTINEL: &str = "END_RECORDING";

/// One-shot, broadcastable "occurred" flag.
///
/// Transitions unset -> set at most once; firing again is a no-op. Any number
/// of readers may await or poll it, from any task, without blocking a flip.
#[derive(Debug, Clone, Default)]
pub struct CaptureSignal {
    token: CancellationToken,
}

impl CaptureSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is already in the occurred state.
    pub fn pre_fired() -> Self {
        let signal = Self::new();
        signal.fire();
        signal
    }

    /// Flips the signal. Idempotent.
    pub fn fire(&self) {
        self.token.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired; immediately if it already has.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

/// The start/end signal pair exposed to the pipeline.
#[derive(Debug, Clone)]
pub struct SignalPair {
    pub start: CaptureSignal,
    pub end: CaptureSignal,
}

impl SignalPair {
    /// When `gated` is false the start signal is born fired: capture is
    /// considered live from construction.
    pub fn new(gated: bool) -> Self {
        Self {
            start: if gated {
                CaptureSignal::new()
            } else {
                CaptureSignal::pre_fired()
            },
            end: CaptureSignal::new(),
        }
    }
}

/// Bridges the browser event stream onto the recording signals.
pub struct RecordingSignalBridge;

impl RecordingSignalBridge {
    /// Subscribes to `events` and returns the signal pair it drives.
    ///
    /// The drain task does bounded, synchronous work per event and the channel
    /// is unbounded, so the browser's delivery path is never stalled. It exits
    /// when the session's sender side is dropped.
    pub fn attach(mut events: EventStream, gated: bool) -> SignalPair {
        let pair = SignalPair::new(gated);
        let signals = pair.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                Self::handle(&signals, gated, event);
            }
            debug!(target: "tabcast.signal", "event stream closed");
        });

        pair
    }

    fn handle(signals: &SignalPair, gated: bool, event: PageEvent) {
        match event {
            PageEvent::Console { kind, args } => {
                if !args.is_empty() {
                    info!(target: "tabcast.signal", %kind, args = %serde_json::Value::from(args.clone()), "console message");
                }
                for arg in &args {
                    match scalar_text(arg).as_str() {
                        START_RECORDING_SENTINEL => {
                            if gated && !signals.start.has_fired() {
                                info!(target: "tabcast.signal", "start sentinel observed");
                                signals.start.fire();
                            }
                        }
                        END_RECORDING_SENTINEL => {
                            if !signals.end.has_fired() {
                                info!(target: "tabcast.signal", "end sentinel observed");
                                signals.end.fire();
                            }
                        }
                        _ => {}
                    }
                }
            }
            // Diagnostics only; never affects signal state.
            PageEvent::ExceptionThrown { description } => {
                warn!(target: "tabcast.signal", "page exception: {description}");
            }
            PageEvent::ResponseReceived {
                url,
                status,
                mime_type,
            } => {
                debug!(target: "tabcast.signal", %url, status, %mime_type, "network response received");
            }
            PageEvent::LoadingFailed { error } => {
                warn!(target: "tabcast.signal", "resource load failed: {error}");
            }
        }
    }
}
