//! # offload-runtime
//!
//! The dispatch core of offload: per-task queue state machine, executor
//! strategies, worker supervision, and the runtime registry with its
//! observability surface.
//!
//! A task is a named unit bound to a factory that produces background
//! workers; a [`TaskHandle`] exposes the worker's handler surface as
//! asynchronous method calls flowing through a shared dispatch queue:
//!
//! ```no_run
//! use offload_adapters::{HandlerMap, LocalWorkerFactory};
//! use offload_runtime::{RuntimeConfig, TaskConfig, TaskDeps, TaskRuntime};
//! use offload_domain::Payload;
//! use std::sync::Arc;
//!
//! # async fn demo() -> offload_shared::Result<()> {
//! let runtime = TaskRuntime::new(RuntimeConfig::default())?;
//! let handlers = HandlerMap::new().with("double", |args: Payload, _signal| async move {
//!     Ok(Payload::Int(args.as_int().unwrap_or(0) * 2))
//! });
//! let task = runtime.define_task(
//!     TaskConfig::singleton(),
//!     TaskDeps::new(Arc::new(LocalWorkerFactory::new(handlers))),
//! )?;
//! let result = task.call("double").args(Payload::Int(21)).dispatch().await?;
//! assert_eq!(result.as_int(), Some(42));
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod executor;
mod observability;
mod queue;
mod runtime;
mod supervisor;
mod task;

pub use observability::{EventBus, EventSubscription};
pub use queue::{KeyExtractor, TransferExtractor};
pub use runtime::{
    RuntimeConfig, SnapshotSubscription, SnapshotSubscriptionOptions, TaskRuntime,
};
pub use task::{CallBuilder, TaskDeps, TaskHandle};

// Re-export the domain and shared types that appear on the public surface,
// so embedders can depend on this crate alone.
pub use offload_domain::{
    CallPhase, CrashPolicy, DispatchOptions, EventKind, InitMode, ObservabilityOverrides,
    Payload, QueuePolicy, RuntimeEvent, RuntimeSnapshot, SpanMode, TaskConfig, TaskKind,
    TaskSnapshot, TransferMode, TransferOverride, WorkerSnapshot,
};
pub use offload_shared::{
    AbortRegistry, AbortSignal, AbortSource, ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind,
    Result, TaskId,
};

/// Returns the runtime crate version.
#[must_use]
pub const fn runtime_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
