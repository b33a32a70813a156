//! End-to-end provisioning behavior through fake resource and browser layers:
//! all-or-nothing construction, exactly-once teardown, retry accounting, and
//! sentinel-driven signals.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tabcast_capture::audio::AudioSinkHandle;
use tabcast_capture::chrome::{BrowserHandle, BrowserLauncher, HandleSlot, LaunchContext};
use tabcast_capture::config::{CaptureConfig, Geometry, PageTarget, RetryPolicy};
use tabcast_capture::controller::CaptureSourceController;
use tabcast_capture::display::{DisplayHandle, DisplayId};
use tabcast_capture::error::{CaptureError, Result};
use tabcast_capture::events::{EventSender, PageEvent};
use tabcast_capture::resources::ResourceFactory;
use tabcast_capture::{END_RECORDING_SENTINEL, START_RECORDING_SENTINEL};

#[derive(Default)]
struct ResourceCounts {
    sinks_created: AtomicU32,
    sinks_destroyed: AtomicU32,
    displays_launched: AtomicU32,
    displays_terminated: AtomicU32,
}

#[derive(Default)]
struct FakeResources {
    counts: Arc<ResourceCounts>,
    fail_sink: bool,
    fail_display: bool,
}

#[async_trait]
impl ResourceFactory for FakeResources {
    async fn create_audio_sink(&self, identity: &str) -> Result<AudioSinkHandle> {
        if self.fail_sink {
            return Err(CaptureError::ProcessFailed {
                component: "pulse",
                source: io::Error::new(io::ErrorKind::NotFound, "pactl not found"),
            });
        }
        self.counts.sinks_created.fetch_add(1, Ordering::SeqCst);
        Ok(AudioSinkHandle {
            module_id: "42".into(),
            identity: identity.into(),
        })
    }

    async fn destroy_audio_sink(&self, _sink: &AudioSinkHandle) {
        self.counts.sinks_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn launch_display(&self, id: DisplayId, geometry: Geometry) -> Result<DisplayHandle> {
        if self.fail_display {
            return Err(CaptureError::ProcessFailed {
                component: "xvfb",
                source: io::Error::new(io::ErrorKind::NotFound, "Xvfb not found"),
            });
        }
        self.counts.displays_launched.fetch_add(1, Ordering::SeqCst);
        Ok(DisplayHandle::detached(id, geometry))
    }

    async fn terminate_display(&self, _display: &mut DisplayHandle) {
        self.counts.displays_terminated.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct LauncherCounts {
    launches: AtomicU32,
    closes: AtomicU32,
}

struct FakeHandle {
    counts: Arc<LauncherCounts>,
}

#[async_trait]
impl BrowserHandle for FakeHandle {
    async fn close(&mut self) {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails its first `failures` launches, then succeeds. Keeps the last event
/// sender around so tests can feed page events after construction.
struct FakeLauncher {
    counts: Arc<LauncherCounts>,
    failures: u32,
    sender: parking_lot::Mutex<Option<EventSender>>,
}

impl FakeLauncher {
    fn new(counts: &Arc<LauncherCounts>, failures: u32) -> Self {
        Self {
            counts: Arc::clone(counts),
            failures,
            sender: parking_lot::Mutex::new(None),
        }
    }

    fn events(&self) -> EventSender {
        self.sender.lock().clone().expect("launcher was never invoked")
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(
        &self,
        _ctx: &LaunchContext,
        events: EventSender,
        slot: &HandleSlot,
    ) -> Result<()> {
        let attempt = self.counts.launches.fetch_add(1, Ordering::SeqCst) + 1;
        *self.sender.lock() = Some(events);
        *slot.lock() = Some(Box::new(FakeHandle {
            counts: Arc::clone(&self.counts),
        }));
        if attempt <= self.failures {
            return Err(CaptureError::ChromeFailedToStart("flaky".into()));
        }
        Ok(())
    }
}

fn config(gated: bool) -> CaptureConfig {
    CaptureConfig {
        identity: "capture-test".into(),
        target: PageTarget::Url {
            url: "https://example.com/room".into(),
        },
        geometry: Geometry::default(),
        enable_sandbox: false,
        allow_insecure: false,
        await_start_signal: gated,
        retry: RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_millis(500),
            navigation_timeout: Duration::from_millis(250),
        },
    }
}

async fn build(
    config: CaptureConfig,
    resources: FakeResources,
    launcher: Arc<FakeLauncher>,
) -> Result<CaptureSourceController> {
    CaptureSourceController::with_parts(
        config,
        Arc::new(resources),
        launcher,
        DisplayId::from_number(123),
    )
    .await
}

#[tokio::test]
async fn construction_allocates_everything_and_close_releases_once() {
    let resources = FakeResources::default();
    let resource_counts = Arc::clone(&resources.counts);
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let controller = build(config(false), resources, launcher).await.unwrap();
    assert_eq!(resource_counts.sinks_created.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts.displays_launched.load(Ordering::SeqCst), 1);
    assert_eq!(launcher_counts.launches.load(Ordering::SeqCst), 1);

    controller.close().await;
    controller.close().await;

    assert_eq!(launcher_counts.closes.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts.displays_terminated.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts.sinks_destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_until_the_final_attempt_then_succeeds() {
    let resources = FakeResources::default();
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 2));

    let controller = build(config(false), resources, launcher).await.unwrap();

    assert_eq!(launcher_counts.launches.load(Ordering::SeqCst), 3);
    // The two failed attempts' handles were closed before retrying.
    assert_eq!(launcher_counts.closes.load(Ordering::SeqCst), 2);

    controller.close().await;
    assert_eq!(launcher_counts.closes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhaustion_tears_down_display_and_sink_exactly_once() {
    let resources = FakeResources::default();
    let resource_counts = Arc::clone(&resources.counts);
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, u32::MAX));

    let err = build(config(false), resources, launcher).await.unwrap_err();

    assert!(matches!(err, CaptureError::ExhaustedRetries { attempts: 3, .. }));
    assert_eq!(launcher_counts.launches.load(Ordering::SeqCst), 3);
    assert_eq!(launcher_counts.closes.load(Ordering::SeqCst), 3);
    assert_eq!(resource_counts.displays_terminated.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts.sinks_destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn display_failure_destroys_sink_and_never_launches_a_browser() {
    let resources = FakeResources {
        fail_display: true,
        ..FakeResources::default()
    };
    let resource_counts = Arc::clone(&resources.counts);
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let err = build(config(false), resources, launcher).await.unwrap_err();

    assert!(matches!(err, CaptureError::ProcessFailed { component: "xvfb", .. }));
    assert_eq!(resource_counts.sinks_created.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts.sinks_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(launcher_counts.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sink_failure_aborts_before_any_other_allocation() {
    let resources = FakeResources {
        fail_sink: true,
        ..FakeResources::default()
    };
    let resource_counts = Arc::clone(&resources.counts);
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let err = build(config(false), resources, launcher).await.unwrap_err();

    assert!(matches!(err, CaptureError::ProcessFailed { component: "pulse", .. }));
    assert_eq!(resource_counts.displays_launched.load(Ordering::SeqCst), 0);
    assert_eq!(launcher_counts.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_target_fails_before_touching_the_host() {
    let resources = FakeResources::default();
    let resource_counts = Arc::clone(&resources.counts);
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let mut config = config(false);
    config.target = PageTarget::Composed {
        base_url: "definitely not a url".into(),
        layout: "grid".into(),
        ws_url: "wss://x".into(),
        token: "t".into(),
    };

    let err = build(config, resources, launcher).await.unwrap_err();
    assert!(matches!(err, CaptureError::InvalidTarget(_)));
    assert_eq!(resource_counts.sinks_created.load(Ordering::SeqCst), 0);
}

fn console(text: &str) -> PageEvent {
    PageEvent::Console {
        kind: "log".into(),
        args: vec![json!(text)],
    }
}

#[tokio::test]
async fn gated_capture_follows_page_sentinels() {
    let resources = FakeResources::default();
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let controller = build(config(true), resources, Arc::clone(&launcher))
        .await
        .unwrap();
    let events = launcher.events();

    let start = controller.await_start();
    let end = controller.await_end();
    assert!(!start.has_fired());

    events.send(console(START_RECORDING_SENTINEL)).unwrap();
    tokio::time::timeout(Duration::from_secs(1), start.fired())
        .await
        .expect("start signal should fire");

    // Duplicate sentinel is a no-op.
    events.send(console(START_RECORDING_SENTINEL)).unwrap();

    events.send(console(END_RECORDING_SENTINEL)).unwrap();
    tokio::time::timeout(Duration::from_secs(1), end.fired())
        .await
        .expect("end signal should fire");
    assert!(start.has_fired(), "start must stay fired after end");

    controller.close().await;
}

#[tokio::test]
async fn ungated_capture_is_live_at_construction() {
    let resources = FakeResources::default();
    let launcher_counts = Arc::new(LauncherCounts::default());
    let launcher = Arc::new(FakeLauncher::new(&launcher_counts, 0));

    let controller = build(config(false), resources, launcher).await.unwrap();
    assert!(controller.await_start().has_fired());
    assert!(!controller.await_end().has_fired());

    let before = std::time::SystemTime::now();
    assert!(controller.started_at() >= before);

    controller.close().await;
}
