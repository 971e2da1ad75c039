//! Call descriptors and dispatch options.

use crate::payload::Payload;
use crate::transfer::TransferOverride;
use offload_shared::{AbortSignal, CallId, TaskId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call overrides accepted alongside method arguments.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Call-group key for routing and keyed cancellation.
    pub key: Option<Box<str>>,
    /// Externally owned abort signal.
    pub signal: Option<AbortSignal>,
    /// Per-call timeout; overrides the task default.
    pub timeout_ms: Option<u64>,
    /// Transferable handoff override.
    pub transfer: TransferOverride,
}

/// Immutable dispatch metadata for one call.
///
/// Produced by the task handle, admitted by the queue core, and carried
/// unchanged through the executor and supervisor.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Owning task.
    pub task_id: TaskId,
    /// Monotonic id within the task.
    pub call_id: CallId,
    /// Handler method name.
    pub method: Box<str>,
    /// Handler arguments.
    pub args: Payload,
    /// Call-group key, when provided.
    pub key: Option<Box<str>>,
    /// Externally owned abort signal, when provided.
    pub external_signal: Option<AbortSignal>,
    /// Effective timeout, after applying the task default.
    pub timeout: Option<Duration>,
    /// Transferable handoff override.
    pub transfer: TransferOverride,
}

impl CallDescriptor {
    /// Build a descriptor from method arguments and dispatch options.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        call_id: CallId,
        method: impl Into<Box<str>>,
        args: Payload,
        options: DispatchOptions,
        default_timeout_ms: Option<u64>,
    ) -> Self {
        let timeout_ms = options.timeout_ms.or(default_timeout_ms);
        Self {
            task_id,
            call_id,
            method: method.into(),
            args,
            key: options.key,
            external_signal: options.signal,
            timeout: timeout_ms.map(Duration::from_millis),
            transfer: options.transfer,
        }
    }
}

/// Where a call currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallPhase {
    /// Descriptor materialized, not yet admitted.
    Created,
    /// Parked by the block policy.
    Waiting,
    /// Admitted, not yet dispatched.
    Pending,
    /// Dispatched to a worker.
    InFlight,
    /// Fulfilled or rejected.
    Settled,
}

impl CallPhase {
    /// Stable label for events and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::InFlight => "inFlight",
            Self::Settled => "settled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_call_timeout_overrides_task_default() {
        let options = DispatchOptions {
            timeout_ms: Some(25),
            ..DispatchOptions::default()
        };
        let descriptor = CallDescriptor::new(
            TaskId::generate(),
            CallId::from_raw(1),
            "resize",
            Payload::Null,
            options,
            Some(1_000),
        );
        assert_eq!(descriptor.timeout, Some(Duration::from_millis(25)));
    }

    #[test]
    fn task_default_timeout_applies_when_unset() {
        let descriptor = CallDescriptor::new(
            TaskId::generate(),
            CallId::from_raw(2),
            "resize",
            Payload::Null,
            DispatchOptions::default(),
            Some(40),
        );
        assert_eq!(descriptor.timeout, Some(Duration::from_millis(40)));
    }

    #[test]
    fn phase_labels_are_stable() {
        assert_eq!(CallPhase::Waiting.name(), "waiting");
        assert_eq!(CallPhase::InFlight.name(), "inFlight");
    }
}
