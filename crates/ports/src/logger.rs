//! Structured logging boundary contract for the dispatch core.
//!
//! Every event the runtime logs is scoped to a task, and worker lifecycle
//! events additionally name the worker instance, so both identities are
//! first-class on [`LogEvent`] instead of being smuggled through free-form
//! fields.

use offload_shared::{TaskId, WorkerId};
use std::collections::BTreeMap;

/// Severity, ordered from chattiest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// Stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Additional event fields. Values stay low-cardinality; call ids and keys
/// belong in the event stream, not in logs.
pub type LogFields = BTreeMap<Box<str>, serde_json::Value>;

/// One structured event emitted by the dispatch core.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Stable event name (`runtime.task.defined`, `worker.crash`, ...).
    pub event: Box<str>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: Box<str>,
    /// Originating task, when the event is task-scoped.
    pub task_id: Option<TaskId>,
    /// Subject worker instance, for worker lifecycle events.
    pub worker_id: Option<WorkerId>,
    /// Optional structured fields.
    pub fields: Option<LogFields>,
    /// Optional error payload.
    pub error: Option<serde_json::Value>,
}

impl LogEvent {
    /// A bare event with no task or worker scope.
    pub fn new(level: LogLevel, event: &str, message: &str) -> Self {
        Self {
            event: Box::from(event),
            level,
            message: Box::from(message),
            task_id: None,
            worker_id: None,
            fields: None,
            error: None,
        }
    }

    /// Scope the event to a task.
    #[must_use]
    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.clone());
        self
    }

    /// Name the subject worker instance.
    #[must_use]
    pub fn for_worker(mut self, worker_id: &WorkerId) -> Self {
        self.worker_id = Some(worker_id.clone());
        self
    }

    /// Attach structured fields.
    #[must_use]
    pub fn with_fields(mut self, fields: LogFields) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Attach an error payload.
    #[must_use]
    pub fn with_error(mut self, error: serde_json::Value) -> Self {
        self.error = Some(error);
        self
    }
}

/// Boundary contract for structured logging.
pub trait LoggerPort: Send + Sync {
    /// Emit a structured event.
    fn log(&self, event: LogEvent);

    /// Convenience: task-scoped info event.
    fn task_info(&self, event: &str, message: &str, task_id: &TaskId, fields: Option<LogFields>) {
        let mut log_event = LogEvent::new(LogLevel::Info, event, message).for_task(task_id);
        if let Some(fields) = fields {
            log_event = log_event.with_fields(fields);
        }
        self.log(log_event);
    }

    /// Convenience: task-scoped error event.
    fn task_error(&self, event: &str, message: &str, task_id: &TaskId, fields: Option<LogFields>) {
        let mut log_event = LogEvent::new(LogLevel::Error, event, message).for_task(task_id);
        if let Some(fields) = fields {
            log_event = log_event.with_fields(fields);
        }
        self.log(log_event);
    }

    /// Convenience: worker lifecycle info event. The worker id may be absent
    /// when a slot stops before its instance was recorded.
    fn worker_info(
        &self,
        event: &str,
        message: &str,
        task_id: &TaskId,
        worker_id: Option<&WorkerId>,
    ) {
        let mut log_event = LogEvent::new(LogLevel::Info, event, message).for_task(task_id);
        if let Some(worker_id) = worker_id {
            log_event = log_event.for_worker(worker_id);
        }
        self.log(log_event);
    }

    /// Convenience: worker lifecycle error event (crashes).
    fn worker_error(
        &self,
        event: &str,
        message: &str,
        task_id: &TaskId,
        worker_id: Option<&WorkerId>,
        fields: Option<LogFields>,
    ) {
        let mut log_event = LogEvent::new(LogLevel::Error, event, message).for_task(task_id);
        if let Some(worker_id) = worker_id {
            log_event = log_event.for_worker(worker_id);
        }
        if let Some(fields) = fields {
            log_event = log_event.with_fields(fields);
        }
        self.log(log_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }

    #[test]
    fn builders_scope_task_and_worker() {
        let task_id = TaskId::generate();
        let worker_id = WorkerId::generate();
        let event = LogEvent::new(LogLevel::Info, "worker.start", "Worker booted")
            .for_task(&task_id)
            .for_worker(&worker_id);

        assert_eq!(event.task_id.as_ref(), Some(&task_id));
        assert_eq!(event.worker_id.as_ref(), Some(&worker_id));
        assert!(event.fields.is_none());
    }
}
