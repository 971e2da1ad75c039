//! # offload-testkit
//!
//! Test helpers and in-memory doubles.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod factories;
pub mod in_memory;

pub use factories::{CountingFactory, FlakyBootFactory};
pub use in_memory::{CountingTelemetry, EventCollector, NoopLogger, NoopTelemetry};

/// Returns the testkit crate version.
#[must_use]
pub const fn testkit_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
