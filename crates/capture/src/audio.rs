//! Virtual audio sink lifecycle (PulseAudio null sink).

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};

/// Owns a loaded PulseAudio null-sink module.
///
/// The sink is addressed by `identity` (the browser routes audio into it via
/// `PULSE_SINK`); `module_id` is what `pactl` hands back for unloading.
#[derive(Debug, Clone)]
pub struct AudioSinkHandle {
    pub module_id: String,
    pub identity: String,
}

fn sink_args(identity: &str) -> Vec<String> {
    vec![
        "load-module".into(),
        "module-null-sink".into(),
        format!("sink_name=\"{identity}\""),
        format!("sink_properties=device.description=\"{identity}\""),
    ]
}

/// Loads a null sink named after `identity` and returns its module id.
pub async fn create_sink(identity: &str) -> Result<AudioSinkHandle> {
    debug!(target: "tabcast.audio", identity, "creating pulse sink");

    let output = Command::new("pactl")
        .args(sink_args(identity))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| CaptureError::ProcessFailed {
            component: "pulse",
            source,
        })?;

    for line in String::from_utf8_lossy(&output.stderr).lines() {
        info!(target: "tabcast.process", cmd = "pactl", "{line}");
    }

    if !output.status.success() {
        return Err(CaptureError::ProcessFailed {
            component: "pulse",
            source: std::io::Error::other(format!("pactl exited with {}", output.status)),
        });
    }

    let module_id = String::from_utf8_lossy(&output.stdout)
        .trim_end_matches('\n')
        .to_string();

    Ok(AudioSinkHandle {
        module_id,
        identity: identity.to_string(),
    })
}

/// Unloads the sink's module. Best-effort: the sink is host-global, and by the
/// time we get here a more relevant error may already be in flight, so failures
/// are logged rather than surfaced.
pub async fn destroy_sink(handle: &AudioSinkHandle) {
    debug!(target: "tabcast.audio", module = %handle.module_id, "unloading pulse module");
    match Command::new("pactl")
        .args(["unload-module", &handle.module_id])
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => {
            warn!(target: "tabcast.audio", module = %handle.module_id, %status, "failed to unload pulse sink");
        }
        Err(e) => {
            warn!(target: "tabcast.audio", module = %handle.module_id, error = %e, "failed to unload pulse sink");
        }
    }
}
