//! Error envelope types and the dispatch error taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata attached to errors for diagnostics.
pub type ErrorMetadata = BTreeMap<String, String>;

/// Shared result type used across the workspace.
pub type Result<T, E = ErrorEnvelope> = std::result::Result<T, E>;

/// High-level classification of error origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Expected failures (admission decisions, cancellation, poisoned tasks).
    Expected,
    /// Invariant violations in dispatch logic.
    Invariant,
    /// Unexpected failures (worker crashes, handler faults).
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expected => formatter.write_str("expected"),
            Self::Invariant => formatter.write_str("invariant"),
            Self::Unexpected => formatter.write_str("unexpected"),
        }
    }
}

/// Retry classification for failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The operation can be retried safely.
    Retriable,
    /// The operation should not be retried.
    NonRetriable,
}

impl ErrorClass {
    /// Returns true when the error is considered retriable.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retriable)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retriable => formatter.write_str("retriable"),
            Self::NonRetriable => formatter.write_str("non-retriable"),
        }
    }
}

/// Stable error code with namespace and identifier.
///
/// The rendered form (`namespace:code`) is the wire-visible discriminator:
/// callers branch on it without relying on Rust type identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    namespace: String,
    code: String,
}

impl ErrorCode {
    /// Create a new error code with a namespace and code.
    pub fn new(namespace: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            code: code.into(),
        }
    }

    /// A call was aborted before or during execution.
    pub fn abort() -> Self {
        Self::new("task", "abort")
    }

    /// A call's deadline expired before any other abort cause fired.
    pub fn timeout() -> Self {
        Self::new("task", "timeout")
    }

    /// Admission rejected a call because a queue cap was reached.
    pub fn queue_full() -> Self {
        Self::new("task", "queue_full")
    }

    /// A queued call was evicted by a drop policy.
    pub fn dropped() -> Self {
        Self::new("task", "dropped")
    }

    /// The worker transport failed while the call was in-flight.
    pub fn worker_crashed() -> Self {
        Self::new("worker", "crashed")
    }

    /// The task is poisoned or disposed; no further calls are accepted.
    pub fn task_failed() -> Self {
        Self::new("task", "failed")
    }

    /// The worker handler rejected the call with a non-abort error.
    pub fn handler() -> Self {
        Self::new("task", "handler")
    }

    /// Invalid input code (configuration or argument validation).
    pub fn invalid_input() -> Self {
        Self::new("core", "invalid_input")
    }

    /// Internal failure code.
    pub fn internal() -> Self {
        Self::new("core", "internal")
    }

    /// Returns the namespace portion.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the code identifier.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.namespace, self.code)
    }
}

/// Structured error envelope shared across crates.
///
/// Every settled call rejects with one of these; transport-layer failures are
/// never surfaced raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error kind describing the origin category.
    pub kind: ErrorKind,
    /// Retry classification.
    pub class: ErrorClass,
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Additional diagnostic metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ErrorMetadata,
}

impl ErrorEnvelope {
    /// Create an expected error with non-retriable classification.
    pub fn expected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::expected_with_class(code, message, ErrorClass::NonRetriable)
    }

    /// Create an expected error with an explicit retry classification.
    pub fn expected_with_class(
        code: ErrorCode,
        message: impl Into<String>,
        class: ErrorClass,
    ) -> Self {
        Self {
            kind: ErrorKind::Expected,
            class,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create an invariant error (always non-retriable).
    pub fn invariant(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Invariant,
            class: ErrorClass::NonRetriable,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create an unexpected error with the provided retry classification.
    pub fn unexpected(code: ErrorCode, message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            kind: ErrorKind::Unexpected,
            class,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// A call aborted by an external signal, a key abort, or cancellation.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::abort(), message)
    }

    /// A call whose deadline expired first.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::expected_with_class(ErrorCode::timeout(), message, ErrorClass::Retriable)
    }

    /// Admission rejected the call (pending or waiting cap reached).
    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::expected_with_class(ErrorCode::queue_full(), message, ErrorClass::Retriable)
    }

    /// A queued call evicted by drop-oldest or drop-latest.
    pub fn dropped(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::dropped(), message)
    }

    /// The worker carrying this call crashed.
    pub fn worker_crashed(message: impl Into<String>) -> Self {
        Self::unexpected(ErrorCode::worker_crashed(), message, ErrorClass::Retriable)
    }

    /// The task is poisoned or disposed.
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::task_failed(), message)
    }

    /// Wrap a handler rejection, preserving the original message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::unexpected(ErrorCode::handler(), message, ErrorClass::NonRetriable)
    }

    /// Returns true if the error represents an abort.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.code == ErrorCode::abort()
    }

    /// Returns true if the error represents a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::timeout()
    }

    /// Returns true for abort-shaped errors (abort or timeout), the shapes a
    /// cooperative handler reports when it observes its cancel signal.
    #[must_use]
    pub fn is_abort_shaped(&self) -> bool {
        self.is_abort() || self.is_timeout()
    }

    /// Returns true if the error came from a worker crash.
    #[must_use]
    pub fn is_worker_crash(&self) -> bool {
        self.code == ErrorCode::worker_crashed()
    }

    /// Attach a single metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} {}: {}",
            self.kind, self.class, self.code, self.message
        )
    }
}

impl std::error::Error for ErrorEnvelope {}
