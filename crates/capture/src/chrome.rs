//! Sandboxed browser session: launch, instrumentation, navigation.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::cdp::CdpConnection;
use crate::config::Geometry;
use crate::display::{self, DisplayId};
use crate::error::{CaptureError, Result};
use crate::events::EventSender;

/// Everything one launch+navigate attempt needs, resolved by the controller.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub url: String,
    pub display: DisplayId,
    pub sink_identity: String,
    pub geometry: Geometry,
    pub enable_sandbox: bool,
    pub allow_insecure: bool,
    pub navigation_timeout: Duration,
}

/// A live (or failed-but-launched) browser session that can be torn down.
#[async_trait]
pub trait BrowserHandle: Send {
    /// Cancels the browsing context, then the underlying process. Must be
    /// idempotent and safe on a handle from a failed launch.
    async fn close(&mut self);
}

impl std::fmt::Debug for dyn BrowserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn BrowserHandle")
    }
}

/// Slot a launch attempt publishes its handle into.
///
/// The handle lands here as soon as the session exists, before navigation, so
/// the supervisor can cancel it no matter where the attempt fails.
pub type HandleSlot = Arc<parking_lot::Mutex<Option<Box<dyn BrowserHandle>>>>;

pub fn handle_slot() -> HandleSlot {
    Arc::new(parking_lot::Mutex::new(None))
}

/// Launches a browser attached to the capture environment and navigates it.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Runs one full launch+navigate unit. On success the ready handle is in
    /// `slot`; on failure whatever was launched is either already reaped or in
    /// `slot` for the supervisor to cancel.
    async fn launch(
        &self,
        ctx: &LaunchContext,
        events: EventSender,
        slot: &HandleSlot,
    ) -> Result<()>;
}

const ENDPOINT_PROBE_ATTEMPTS: u32 = 50;
const ENDPOINT_PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// In-DOM error reporting contract: pages surface fatal setup errors in a
/// `div.error` element.
const ERROR_PROBE_JS: &str = "(() => {
    const el = document.querySelector('div.error');
    return el ? el.innerText : '';
})()";

fn find_browser_executable() -> Option<String> {
    // Xvfb and PulseAudio bound this to Linux hosts; no need for the
    // macOS/Windows candidate lists.
    let candidates = [
        "google-chrome-stable",
        "google-chrome",
        "chromium-browser",
        "chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium-browser",
        "/usr/bin/chromium",
        "/snap/bin/chromium",
    ];

    for candidate in candidates {
        if candidate.starts_with('/') {
            if std::path::Path::new(candidate).exists() {
                return Some(candidate.to_string());
            }
        } else if which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }

    None
}

/// Fixed automation-hardening and resource-saving flag profile.
fn chrome_args(ctx: &LaunchContext, debug_port: u16) -> Vec<String> {
    let mut args: Vec<String> = vec![
        format!("--remote-debugging-port={debug_port}"),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-gpu".into(),
        // puppeteer default behavior
        "--disable-infobars".into(),
        "--disable-background-networking".into(),
        "--enable-features=NetworkService,NetworkServiceInProcess".into(),
        "--disable-background-timer-throttling".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--disable-breakpad".into(),
        "--disable-client-side-phishing-detection".into(),
        "--disable-default-apps".into(),
        "--disable-dev-shm-usage".into(),
        "--disable-extensions".into(),
        "--disable-features=AudioServiceOutOfProcess,site-per-process,Translate,TranslateUI,BlinkGenPropertyTrees".into(),
        "--disable-hang-monitor".into(),
        "--disable-ipc-flooding-protection".into(),
        "--disable-popup-blocking".into(),
        "--disable-prompt-on-repost".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-sync".into(),
        "--force-color-profile=srgb".into(),
        "--metrics-recording-only".into(),
        "--safebrowsing-disable-auto-update".into(),
        "--password-store=basic".into(),
        "--use-mock-keychain".into(),
        // capture environment
        "--kiosk".into(),
        "--disable-translate".into(),
        "--autoplay-policy=no-user-gesture-required".into(),
        "--window-position=0,0".into(),
        format!("--window-size={},{}", ctx.geometry.width, ctx.geometry.height),
        format!("--display={}", ctx.display),
    ];

    if !ctx.enable_sandbox {
        args.push("--no-sandbox".into());
    }
    if ctx.allow_insecure {
        args.push("--disable-web-security".into());
        args.push("--allow-running-insecure-content".into());
    }

    // Guarantees a page target exists before we navigate it.
    args.push("about:blank".into());
    args
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(|e| {
        CaptureError::ChromeFailedToStart(format!("no free debugging port: {e}"))
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| CaptureError::ChromeFailedToStart(format!("no free debugging port: {e}")))?
        .port();
    Ok(port)
}

/// `/json/list` entry subset from the DevTools HTTP endpoint.
#[derive(Debug, Deserialize)]
struct DevToolsTarget {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

async fn fetch_page_ws_url(client: &reqwest::Client, port: u16) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{port}/json/list");
    let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("unexpected status {}", response.status()));
    }
    let targets: Vec<DevToolsTarget> = response.json().await.map_err(|e| e.to_string())?;
    targets
        .into_iter()
        .find(|t| t.kind == "page")
        .and_then(|t| t.ws_url)
        .ok_or_else(|| "no page target yet".to_string())
}

/// Polls the DevTools endpoint until a page target is reachable, watching for
/// the browser dying underneath us.
async fn probe_page_endpoint(child: &mut Child, port: u16) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(400))
        .build()
        .map_err(|e| CaptureError::ChromeFailedToStart(format!("http client: {e}")))?;

    let mut last_error = "endpoint not reachable".to_string();
    for _ in 0..ENDPOINT_PROBE_ATTEMPTS {
        tokio::time::sleep(ENDPOINT_PROBE_INTERVAL).await;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(CaptureError::ChromeFailedToStart(format!(
                "exited before devtools endpoint became available (status: {status})"
            )));
        }

        match fetch_page_ws_url(&client, port).await {
            Ok(ws_url) => return Ok(ws_url),
            Err(e) => last_error = e,
        }
    }

    Err(CaptureError::ChromeFailedToStart(format!(
        "devtools endpoint not available on port {port}: {last_error}"
    )))
}

/// Real browser session handle: the DevTools connection and the process,
/// torn down in that order.
pub struct ChromeHandle {
    conn: Option<CdpConnection>,
    child: Option<Child>,
}

impl ChromeHandle {
    fn new(conn: CdpConnection, child: Child) -> Self {
        Self {
            conn: Some(conn),
            child: Some(child),
        }
    }
}

#[async_trait]
impl BrowserHandle for ChromeHandle {
    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(target: "tabcast.chrome", "closing devtools connection");
            conn.shutdown().await;
        }
        if let Some(mut child) = self.child.take() {
            debug!(target: "tabcast.chrome", "closing chrome");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Production launcher: spawns a Chromium-family browser on the virtual
/// display, routes its audio into the sink, and drives navigation over
/// DevTools.
#[derive(Debug, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(
        &self,
        ctx: &LaunchContext,
        events: EventSender,
        slot: &HandleSlot,
    ) -> Result<()> {
        let executable = find_browser_executable().ok_or_else(|| {
            CaptureError::ChromeFailedToStart("no chromium executable found".into())
        })?;
        let port = free_port()?;

        debug!(
            target: "tabcast.chrome",
            url = %ctx.url,
            display = %ctx.display,
            sandbox = ctx.enable_sandbox,
            insecure = ctx.allow_insecure,
            "launching chrome",
        );

        // kill_on_drop: if this attempt is abandoned mid-launch (wall-clock
        // timeout drops the future), the process is still reaped.
        let mut child = Command::new(&executable)
            .args(chrome_args(ctx, port))
            .env("PULSE_SINK", &ctx.sink_identity)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::ChromeFailedToStart(format!("spawn {executable}: {e}"))
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(display::forward_stderr("chrome", stderr));
        }

        let ws_url = probe_page_endpoint(&mut child, port).await?;
        let conn = CdpConnection::connect(&ws_url, events).await?;

        // From here the attempt owns a cancelable handle; publish it before
        // navigating so a failed attempt is always cleaned up by the caller.
        *slot.lock() = Some(Box::new(ChromeHandle::new(conn.clone(), child)));

        navigate(&conn, ctx).await
    }
}

async fn navigate(conn: &CdpConnection, ctx: &LaunchContext) -> Result<()> {
    for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
        conn.call(domain, json!({})).await?;
    }

    let result = conn.call("Page.navigate", json!({ "url": ctx.url })).await?;
    if let Some(error_text) = result["errorText"].as_str() {
        if !error_text.is_empty() {
            return Err(CaptureError::PageLoadFailed(error_text.into()));
        }
    }

    tokio::time::timeout(ctx.navigation_timeout, conn.wait_for_load())
        .await
        .map_err(|_| CaptureError::timed_out())?;

    let eval = conn
        .call(
            "Runtime.evaluate",
            json!({ "expression": ERROR_PROBE_JS, "returnByValue": true }),
        )
        .await?;
    if let Some(text) = eval["result"]["value"].as_str() {
        if !text.is_empty() {
            return Err(CaptureError::PageLoadFailed(text.into()));
        }
    }

    Ok(())
}
