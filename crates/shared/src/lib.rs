//! # offload-shared
//!
//! Shared utilities, result types, and error handling for the offload
//! workspace.
//!
//! This crate provides foundational types that are used across all other
//! crates:
//!
//! - Result and error envelope types with stable dispatch error codes
//! - Abort sources, composite signals, and the keyed abort registry
//! - Deadline timers expressed as abort inputs
//! - Task / worker / call identifiers
//!
//! ## Design Principles
//!
//! 1. **No workspace dependencies** - This crate only depends on external crates
//! 2. **Single-writer abort sources** - Signals are cheap clones of one source
//! 3. **Serde-compatible** - Wire-visible types support serialization

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod abort;
pub mod deadline;
pub mod errors;
pub mod ids;
pub mod invariants;

pub use abort::{
    AbortCause, AbortReason, AbortRegistry, AbortSignal, AbortSource, CompositeGuard,
};
pub use deadline::DeadlineHandle;
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, Result,
};
pub use ids::{CallId, CallSequence, TaskId, WorkerId};
pub use invariants::{BoundedUsize, BoundsError};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_types_are_available() {
        let error = ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid");
        assert_eq!(error.kind, ErrorKind::Expected);
        assert_eq!(error.class, ErrorClass::NonRetriable);
    }

    #[test]
    fn shared_abort_types_are_available() {
        let source = AbortSource::new();
        let signal = source.signal();
        assert!(!signal.is_aborted());
    }
}
