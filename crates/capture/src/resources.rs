//! Seam over the host-level resources the controller allocates.
//!
//! The real implementation shells out to Xvfb and pactl; tests substitute a
//! counting fake to verify the leak-freedom and exactly-once teardown
//! properties of construction and `close`.

use async_trait::async_trait;

use crate::audio::{self, AudioSinkHandle};
use crate::config::Geometry;
use crate::display::{self, DisplayHandle, DisplayId};
use crate::error::Result;

/// Allocates and releases the display and audio sink owned by one controller.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn create_audio_sink(&self, identity: &str) -> Result<AudioSinkHandle>;

    /// Best-effort; never escalates.
    async fn destroy_audio_sink(&self, sink: &AudioSinkHandle);

    async fn launch_display(&self, id: DisplayId, geometry: Geometry) -> Result<DisplayHandle>;

    async fn terminate_display(&self, display: &mut DisplayHandle);
}

/// Production resource layer backed by the host's Xvfb and PulseAudio.
#[derive(Debug, Default)]
pub struct HostResources;

#[async_trait]
impl ResourceFactory for HostResources {
    async fn create_audio_sink(&self, identity: &str) -> Result<AudioSinkHandle> {
        audio::create_sink(identity).await
    }

    async fn destroy_audio_sink(&self, sink: &AudioSinkHandle) {
        audio::destroy_sink(sink).await;
    }

    async fn launch_display(&self, id: DisplayId, geometry: Geometry) -> Result<DisplayHandle> {
        display::launch(id, geometry).await
    }

    async fn terminate_display(&self, display: &mut DisplayHandle) {
        display.terminate().await;
    }
}
