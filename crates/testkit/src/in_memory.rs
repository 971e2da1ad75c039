//! In-memory doubles for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests
//! - Deterministic contract tests for the ports layer
//! - Local experimentation without real sinks

use offload_domain::{EventKind, RuntimeEvent};
use offload_ports::{DispatchCounter, LogEvent, LoggerPort, TelemetryPort};
use offload_shared::TaskId;
use std::sync::{Arc, Mutex};

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}
}

/// A no-op telemetry implementation.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn count(&self, _counter: DispatchCounter, _value: u64, _task_id: Option<&TaskId>) {}

    fn record_duration_ms(&self, _name: &str, _duration_ms: u64, _task_id: Option<&TaskId>) {}
}

/// Telemetry double that records counter increments.
#[derive(Debug, Default)]
pub struct CountingTelemetry {
    counters: Mutex<Vec<(DispatchCounter, u64)>>,
}

impl CountingTelemetry {
    /// Total value recorded for a counter's wire name.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("counters lock")
            .iter()
            .filter(|(counter, _)| counter.name() == name)
            .map(|(_, value)| value)
            .sum()
    }
}

impl TelemetryPort for CountingTelemetry {
    fn count(&self, counter: DispatchCounter, value: u64, _task_id: Option<&TaskId>) {
        self.counters
            .lock()
            .expect("counters lock")
            .push((counter, value));
    }

    fn record_duration_ms(&self, _name: &str, _duration_ms: u64, _task_id: Option<&TaskId>) {}
}

/// Collects runtime events for assertions.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl EventCollector {
    /// A fresh, shareable collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A listener closure suitable for `subscribe_events`.
    pub fn listener(self: &Arc<Self>) -> impl Fn(&RuntimeEvent) + Send + Sync + 'static {
        let collector = Arc::clone(self);
        move |event: &RuntimeEvent| {
            collector
                .events
                .lock()
                .expect("events lock")
                .push(event.clone());
        }
    }

    /// All collected events, in arrival order.
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().expect("events lock").clone()
    }

    /// Events of one kind, in arrival order.
    pub fn of_kind(&self, kind: EventKind) -> Vec<RuntimeEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }

    /// Number of events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_filters_by_kind() {
        let collector = EventCollector::new();
        let listener = collector.listener();
        listener(&RuntimeEvent::new(EventKind::Dispatch, TaskId::generate()));
        listener(&RuntimeEvent::new(EventKind::Settle, TaskId::generate()));
        listener(&RuntimeEvent::new(EventKind::Dispatch, TaskId::generate()));

        assert_eq!(collector.count(EventKind::Dispatch), 2);
        assert_eq!(collector.count(EventKind::Settle), 1);
        assert_eq!(collector.count(EventKind::WorkerCrash), 0);
    }

    #[test]
    fn counting_telemetry_sums_increments() {
        let telemetry = CountingTelemetry::default();
        telemetry.count(DispatchCounter::WorkerCrashes, 1, None);
        telemetry.count(DispatchCounter::WorkerCrashes, 2, None);
        telemetry.count(DispatchCounter::Requeues, 1, None);

        assert_eq!(telemetry.counter_total("worker.crash.total"), 3);
        assert_eq!(telemetry.counter_total("task.requeue.total"), 1);
        assert_eq!(telemetry.counter_total("task.dispatch.total"), 0);
    }
}
