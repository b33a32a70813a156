//! Minimal DevTools wire client.
//!
//! Request/response correlation over a page's WebSocket endpoint: sequential
//! ids, a pending-callback map resolved by a reader pump, and conversion of
//! unsolicited notifications into [`PageEvent`]s. The protocol itself is a
//! black box to the rest of the crate; only this module speaks it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{CaptureError, Result};
use crate::events::{self, EventSender};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpError {
    message: String,
}

/// Messages with an `id` are command responses; the rest are notifications.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CdpMessage {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CdpError>,
    },
    Event {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Connection to one page target. Cheap to clone; all clones share the socket.
#[derive(Clone)]
pub(crate) struct CdpConnection {
    inner: Arc<Inner>,
}

struct Inner {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    load_fired: CancellationToken,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CdpConnection {
    /// Connects to the target's WebSocket endpoint and starts the reader pump.
    pub(crate) async fn connect(ws_url: &str, events: EventSender) -> Result<Self> {
        let (socket, _) = connect_async(ws_url)
            .await
            .map_err(|e| CaptureError::ChromeFailedToStart(format!("devtools connect: {e}")))?;
        let (writer, reader) = socket.split();

        let pending: PendingMap = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let load_fired = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            reader,
            Arc::clone(&pending),
            events,
            load_fired.clone(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                pending,
                writer: tokio::sync::Mutex::new(Some(writer)),
                load_fired,
                pump: parking_lot::Mutex::new(Some(pump)),
            }),
        })
    }

    /// Sends a command and awaits its response.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let request = CdpRequest { id, method, params };
        let text = serde_json::to_string(&request)
            .map_err(|e| CaptureError::PageLoadFailed(format!("encode {method}: {e}")))?;
        trace!(target: "tabcast.cdp", method, id, "sending command");

        {
            let mut writer = self.inner.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.inner.pending.lock().remove(&id);
                return Err(CaptureError::PageLoadFailed(
                    "devtools connection closed".into(),
                ));
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                self.inner.pending.lock().remove(&id);
                return Err(CaptureError::PageLoadFailed(format!("send {method}: {e}")));
            }
        }

        rx.await
            .map_err(|_| CaptureError::PageLoadFailed("devtools connection closed".into()))?
    }

    /// Resolves once the page's load event has fired. At most once per
    /// connection; immediate for late callers.
    pub(crate) async fn wait_for_load(&self) {
        self.inner.load_fired.cancelled().await;
    }

    /// Closes the socket and stops the pump. Idempotent.
    pub(crate) async fn shutdown(&self) {
        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.pending.lock().clear();
    }
}

async fn run_pump(
    mut reader: WsSource,
    pending: PendingMap,
    events: EventSender,
    load_fired: CancellationToken,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let parsed: CdpMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(target: "tabcast.cdp", error = %e, "unparseable devtools message");
                continue;
            }
        };

        match parsed {
            CdpMessage::Response { id, result, error } => {
                let Some(tx) = pending.lock().remove(&id) else {
                    continue;
                };
                let outcome = match error {
                    Some(err) => Err(CaptureError::PageLoadFailed(err.message)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            CdpMessage::Event { method, params } => {
                if method == "Page.loadEventFired" {
                    load_fired.cancel();
                }
                if let Some(event) = events::decode(&method, &params) {
                    // Unbounded send: never blocks the delivery path.
                    let _ = events.send(event);
                }
            }
        }
    }
    debug!(target: "tabcast.cdp", "devtools stream ended");
}
