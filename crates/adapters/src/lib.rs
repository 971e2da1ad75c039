//! # offload-adapters
//!
//! Adapter implementations for ports (in-process workers, observability
//! sinks). This crate depends on `ports`, `domain`, and `shared`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod local;
pub mod log_sink;
pub mod logger;
pub mod telemetry;

pub use local::{HandlerFuture, HandlerMap, LocalWorker, LocalWorkerFactory};
pub use log_sink::{LogSink, MemoryLogSink, StderrLogSink};
pub use logger::JsonLogger;
pub use telemetry::{JsonTelemetry, SpanSampler};

use offload_shared::ErrorEnvelope;

/// The envelope every port surface returns when the worker's command channel
/// is gone: the in-process equivalent of a dead transport.
#[must_use]
pub fn channel_down() -> ErrorEnvelope {
    ErrorEnvelope::worker_crashed("worker channel closed")
}

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
