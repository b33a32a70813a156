//! Virtual framebuffer display lifecycle (Xvfb).

use std::fmt;
use std::process::Stdio;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Geometry;
use crate::error::{CaptureError, Result};

/// X display identifier, rendered as `:<n>`.
///
/// Identifiers are host-wide shared state: two controllers on one host must
/// never pick the same one. Selection draws from a space large enough that the
/// birthday-collision probability is negligible for expected concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(u32);

impl DisplayId {
    /// Draws a fresh identifier from the caller-supplied random source.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(10..2_147_483_647))
    }

    /// Wraps an explicit display number (tests, pre-allocated displays).
    pub fn from_number(n: u32) -> Self {
        Self(n)
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Owns the virtual display process. Terminated exactly once.
#[derive(Debug)]
pub struct DisplayHandle {
    pub id: DisplayId,
    pub geometry: Geometry,
    child: Option<Child>,
}

impl DisplayHandle {
    /// Handle without a backing process, for fake resource layers.
    pub fn detached(id: DisplayId, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            child: None,
        }
    }

    /// Kills the display process and waits for it to exit. Tolerates a process
    /// that already exited; repeated calls are no-ops.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        debug!(target: "tabcast.display", display = %self.id, "closing X display");
        if let Err(e) = child.start_kill() {
            warn!(target: "tabcast.display", display = %self.id, error = %e, "failed to signal xvfb");
        }
        if let Err(e) = child.wait().await {
            warn!(target: "tabcast.display", display = %self.id, error = %e, "failed to reap xvfb");
        }
    }
}

fn xvfb_args(id: DisplayId, geometry: Geometry) -> Vec<String> {
    let dims = format!("{}x{}x{}", geometry.width, geometry.height, geometry.depth);
    vec![
        id.to_string(),
        "-screen".into(),
        "0".into(),
        dims,
        "-ac".into(),
        "-nolisten".into(),
        "tcp".into(),
        "-nolisten".into(),
        "unix".into(),
    ]
}

/// Launches Xvfb at `id` with the given geometry.
pub async fn launch(id: DisplayId, geometry: Geometry) -> Result<DisplayHandle> {
    debug!(
        target: "tabcast.display",
        display = %id,
        width = geometry.width,
        height = geometry.height,
        depth = geometry.depth,
        "creating X display",
    );

    let mut child = Command::new("Xvfb")
        .args(xvfb_args(id, geometry))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CaptureError::ProcessFailed {
            component: "xvfb",
            source,
        })?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr("xvfb", stderr));
    }

    Ok(DisplayHandle {
        id,
        geometry,
        child: Some(child),
    })
}

/// Drains a child process's stderr into the log, one line per entry.
pub(crate) async fn forward_stderr<R>(cmd: &'static str, stderr: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "tabcast.process", cmd, "{line}");
    }
}
