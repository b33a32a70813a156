//! Typed boundary over the browser's instrumentation event stream.
//!
//! Raw DevTools notifications arrive as `method` + `params` JSON pairs; they
//! are closed over into [`PageEvent`] here so downstream code dispatches on a
//! tag instead of inspecting dynamic payloads.

use serde_json::Value;
use tokio::sync::mpsc;

/// One event observed on the instrumented page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// A console API call; `args` holds each argument's scalar JSON value.
    Console { kind: String, args: Vec<Value> },
    /// An uncaught page exception.
    ExceptionThrown { description: String },
    /// A network response finished on the page.
    ResponseReceived {
        url: String,
        status: i64,
        mime_type: String,
    },
    /// A resource fetch failed.
    LoadingFailed { error: String },
}

/// Non-blocking sender half handed to the browser session.
pub type EventSender = mpsc::UnboundedSender<PageEvent>;
/// Stream consumed by the recording signal bridge.
pub type EventStream = mpsc::UnboundedReceiver<PageEvent>;

/// Creates the event channel between a browser session and the signal bridge.
pub fn channel() -> (EventSender, EventStream) {
    mpsc::unbounded_channel()
}

/// Maps a raw DevTools notification onto the closed event type.
///
/// Methods outside the capture contract return `None` and are dropped at the
/// boundary.
pub fn decode(method: &str, params: &Value) -> Option<PageEvent> {
    match method {
        "Runtime.consoleAPICalled" => {
            let kind = params["type"].as_str().unwrap_or("log").to_string();
            let args = params["args"]
                .as_array()
                .map(|args| {
                    args.iter()
                        .filter_map(|arg| arg.get("value").cloned())
                        .collect()
                })
                .unwrap_or_default();
            Some(PageEvent::Console { kind, args })
        }
        "Runtime.exceptionThrown" => {
            let details = &params["exceptionDetails"];
            let description = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("unknown exception")
                .to_string();
            Some(PageEvent::ExceptionThrown { description })
        }
        "Network.responseReceived" => {
            let response = &params["response"];
            Some(PageEvent::ResponseReceived {
                url: response["url"].as_str().unwrap_or_default().to_string(),
                status: response["status"].as_i64().unwrap_or_default(),
                mime_type: response["mimeType"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        "Network.loadingFailed" => Some(PageEvent::LoadingFailed {
            error: params["errorText"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        }),
        _ => None,
    }
}

/// String form of a console argument: JSON strings compare as-is, every other
/// scalar through its JSON rendering.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
