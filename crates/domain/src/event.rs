//! Runtime events observable through the event bus.

use crate::call::CallPhase;
use offload_shared::{CallId, ErrorEnvelope, TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A call was handed to a worker.
    Dispatch,
    /// A call fulfilled.
    Settle,
    /// A call rejected (any taxonomy error).
    Reject,
    /// A call was cancelled before or during execution.
    Cancel,
    /// A call was evicted by a drop policy.
    Drop,
    /// A crashed call was re-enqueued.
    Requeue,
    /// A worker instance booted.
    WorkerStart,
    /// A worker instance stopped (idle stop, explicit stop, disposal).
    WorkerStop,
    /// A worker transport failed.
    WorkerCrash,
    /// A trace scope or sampled span closed.
    Trace,
}

impl EventKind {
    /// Stable label for logs and sinks.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Settle => "settle",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Drop => "drop",
            Self::Requeue => "requeue",
            Self::WorkerStart => "worker-start",
            Self::WorkerStop => "worker-stop",
            Self::WorkerCrash => "worker-crash",
            Self::Trace => "trace",
        }
    }
}

/// One observable runtime event. Pure data; safe to ship across threads or
/// serialize into sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvent {
    /// Event discriminator.
    pub kind: EventKind,
    /// Originating task.
    pub task_id: TaskId,
    /// Wall-clock milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Subject call, for call-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    /// Handler method, for call-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Box<str>>,
    /// Call-group key, when the call carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Box<str>>,
    /// Subject worker, for worker-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Phase the call was in when the event fired (cancel events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<CallPhase>,
    /// Error payload for reject/cancel/drop/crash events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    /// Attempt count after a requeue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Span or trace duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Trace scope name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<Box<str>>,
    /// Trace outcome (`ok` | `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_status: Option<Box<str>>,
}

impl RuntimeEvent {
    /// A bare event of the given kind for `task_id`, stamped now.
    #[must_use]
    pub fn new(kind: EventKind, task_id: TaskId) -> Self {
        Self {
            kind,
            task_id,
            timestamp_ms: now_epoch_ms(),
            call_id: None,
            method: None,
            key: None,
            worker_id: None,
            phase: None,
            error: None,
            attempts: None,
            duration_ms: None,
            trace_name: None,
            trace_status: None,
        }
    }

    /// Attach the subject call.
    #[must_use]
    pub fn with_call(mut self, call_id: CallId, method: impl Into<Box<str>>) -> Self {
        self.call_id = Some(call_id);
        self.method = Some(method.into());
        self
    }

    /// Attach the call-group key.
    #[must_use]
    pub fn with_key(mut self, key: Option<Box<str>>) -> Self {
        self.key = key;
        self
    }

    /// Attach the subject worker.
    #[must_use]
    pub fn with_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Attach the call phase observed at event time.
    #[must_use]
    pub const fn with_phase(mut self, phase: CallPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach the error payload.
    #[must_use]
    pub fn with_error(mut self, error: ErrorEnvelope) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach the attempt count.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Attach a span duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach the trace scope name and status.
    #[must_use]
    pub fn with_trace(mut self, name: impl Into<Box<str>>, status: impl Into<Box<str>>) -> Self {
        self.trace_name = Some(name.into());
        self.trace_status = Some(status.into());
        self
    }
}

/// Wall-clock milliseconds since the Unix epoch; zero when the clock is
/// unreadable.
#[must_use]
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}
