//! tabcast-capture: a disposable, isolated capture environment — virtual
//! display, virtual audio sink, and an instrumented headless browser tab —
//! exposed as a live A/V source to a recording pipeline.
//!
//! The entry point is [`CaptureSourceController`]: construction provisions
//! the whole environment (with bounded retries around the flaky browser
//! launch), the signal accessors expose page-driven recording boundaries, and
//! [`CaptureSourceController::close`] unwinds every OS-level resource exactly
//! once, in reverse creation order, from any state.

pub mod audio;
mod cdp;
pub mod chrome;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod events;
pub mod resources;
pub mod signal;
pub mod supervisor;

pub use config::{CaptureConfig, Geometry, PageTarget, RetryPolicy};
pub use controller::CaptureSourceController;
pub use error::{CaptureError, Result};
pub use signal::{
    CaptureSignal, END_RECORDING_SENTINEL, START_RECORDING_SENTINEL, SignalPair,
};
