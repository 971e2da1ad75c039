//! # offload-domain
//!
//! Domain entities, configuration, and value objects for the offload task
//! runtime.
//!
//! This crate contains the core domain model with no infrastructure
//! dependencies:
//!
//! - **Config** - `TaskConfig`, queue and crash policies, span modes
//! - **Calls** - `CallDescriptor`, `DispatchOptions`, `CallPhase`
//! - **Payloads** - the structured value tree crossing the worker boundary
//! - **Transfer** - handoff-set extraction over payload graphs
//! - **States** - worker and task lifecycle states
//! - **Events / Snapshots** - pure-data observability types
//!
//! ## Dependency Rules
//!
//! - Depends only on the `shared` crate
//! - No infrastructure or adapter dependencies
//! - Pure domain logic with no I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

// Re-export shared types for convenience
pub use offload_shared::shared_crate_version;

pub mod call;
pub mod config;
pub mod event;
pub mod payload;
pub mod snapshot;
pub mod states;
pub mod transfer;

pub use call::{CallDescriptor, CallPhase, DispatchOptions};
pub use config::{
    ConfigError, CrashPolicy, DEFAULT_CANCEL_GRACE_MS, InitMode, ObservabilityOverrides,
    PoolSize, QueuePolicy, SpanMode, TaskConfig, TaskKind,
};
pub use event::{EventKind, RuntimeEvent, now_epoch_ms};
pub use payload::Payload;
pub use snapshot::{QueueCounters, RuntimeSnapshot, TaskSnapshot, WorkerSnapshot};
pub use states::{TaskLifecycle, WorkerState};
pub use transfer::{
    MAX_TRANSFER_WALK_DEPTH, TransferList, TransferMode, TransferOverride, detach_blobs,
    extract_transferables,
};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
