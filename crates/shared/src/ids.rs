//! Identifier types for tasks, workers, and calls.

use crate::errors::{ErrorCode, ErrorEnvelope, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifier of a task, unique within a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Parse a caller-provided task id. The value is trimmed; empty values
    /// are rejected.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "taskId must be non-empty",
            ));
        }
        Ok(Self(Arc::<str>::from(trimmed)))
    }

    /// Create a new task id, best-effort unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(Arc::<str>::from(format!("task_{n}")))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl Serialize for TaskId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Identifier of one worker instance. Fresh per boot, so restart histories
/// stay distinguishable in events and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(Arc<str>);

impl WorkerId {
    /// Create a new worker instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::<str>::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identifier of a call, monotonically increasing within its task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Wrap a raw id (test helper; production ids come from [`CallSequence`]).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "call_{}", self.0)
    }
}

/// Issues monotonically increasing call ids for one task.
#[derive(Debug)]
pub struct CallSequence {
    next: AtomicU64,
}

impl CallSequence {
    /// Create a sequence starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issue the next call id.
    #[must_use]
    pub fn next(&self) -> CallId {
        CallId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_parse_rejects_empty() {
        assert!(TaskId::parse("  ").is_err());
        let id = TaskId::parse(" resize ").expect("valid id");
        assert_eq!(id.as_str(), "resize");
    }

    #[test]
    fn generated_task_ids_are_distinct() {
        let first = TaskId::generate();
        let second = TaskId::generate();
        assert_ne!(first, second);
    }

    #[test]
    fn call_sequence_is_monotonic() {
        let sequence = CallSequence::new();
        let first = sequence.next();
        let second = sequence.next();
        assert!(second > first);
        assert_eq!(first.as_u64() + 1, second.as_u64());
    }

    #[test]
    fn worker_ids_are_unique_per_boot() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }
}
