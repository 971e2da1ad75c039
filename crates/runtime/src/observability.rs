//! Observability substrate: counters, the event bus, and span recording.

use offload_domain::{EventKind, QueueCounters, RuntimeEvent, SpanMode};
use offload_ports::{DispatchCounter, LogFields, LoggerPort, TelemetryPort};
use serde_json::json;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;

/// O(1) per-task counters, updated under the queue lock, read lock-free.
#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
    dispatched: AtomicU64,
    settled: AtomicU64,
    rejected: AtomicU64,
    canceled: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
    worker_crashes: AtomicU64,
}

impl TaskCounters {
    pub fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_settled(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_worker_crashes(&self) {
        self.worker_crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueCounters {
        QueueCounters {
            total_dispatched: self.dispatched.load(Ordering::Relaxed),
            total_settled: self.settled.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_canceled: self.canceled.load(Ordering::Relaxed),
            total_dropped: self.dropped.load(Ordering::Relaxed),
            total_requeued: self.requeued.load(Ordering::Relaxed),
            worker_crash_total: self.worker_crashes.load(Ordering::Relaxed),
        }
    }
}

type EventListener = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// Event bus with a listener-count fast path and per-listener panic
/// isolation. Emission with zero listeners is a single atomic load.
pub struct EventBus {
    listeners: Mutex<Vec<(u64, EventListener)>>,
    listener_count: AtomicUsize,
    next_id: AtomicU64,
    listener_errors: AtomicU64,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            listener_count: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            listener_errors: AtomicU64::new(0),
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::Relaxed)
    }

    /// Listener panics swallowed so far.
    #[must_use]
    pub fn listener_errors(&self) -> u64 {
        self.listener_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn subscribe(self: &Arc<Self>, listener: EventListener) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.push((id, listener));
            self.listener_count
                .store(listeners.len(), Ordering::Relaxed);
        }
        EventSubscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub(crate) fn emit(&self, event: &RuntimeEvent) {
        if self.listener_count() == 0 {
            return;
        }
        let listeners: Vec<EventListener> = {
            let guard = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.iter().map(|(_, listener)| Arc::clone(listener)).collect()
        };
        for listener in listeners {
            // A panicking listener is isolated and counted; it never takes
            // the dispatch path down with it.
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                self.listener_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn remove(&self, id: u64) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listener_count
            .store(listeners.len(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Unsubscribes its listener when dropped.
#[derive(Debug)]
pub struct EventSubscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

/// Deterministic span sampling driven by the configured [`SpanMode`].
#[derive(Debug)]
pub(crate) struct SpanRecorder {
    numerator: u64,
    denominator: u64,
    counter: AtomicU64,
}

impl SpanRecorder {
    pub fn new(mode: SpanMode) -> Self {
        let (numerator, denominator) = match mode {
            SpanMode::Off => (0, 1),
            SpanMode::On => (1, 1),
            SpanMode::Sampled { rate } => rate_fraction(rate),
        };
        Self {
            numerator,
            denominator,
            counter: AtomicU64::new(1),
        }
    }

    fn sample(&self) -> bool {
        if self.numerator == 0 {
            return false;
        }
        if self.numerator >= self.denominator {
            return true;
        }
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        id % self.denominator < self.numerator
    }

    /// Begin a dispatch span when sampling admits it.
    pub fn sample_dispatch(&self) -> Option<Instant> {
        self.sample().then(Instant::now)
    }
}

// Render the rate with six decimals and trim, so common rates map to small
// denominators and the modulo cycle stays short (0.5 -> 5/10, 0.25 -> 25/100).
fn rate_fraction(rate: f64) -> (u64, u64) {
    let rate = if rate.is_finite() { rate } else { 1.0 };
    if rate <= 0.0 {
        return (0, 1);
    }
    if rate >= 1.0 {
        return (1, 1);
    }
    let rendered = format!("{rate:.6}");
    let mut parts = rendered.split('.');
    let _int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next().unwrap_or("");
    let frac_trimmed = frac_part.trim_end_matches('0');
    let scale = match frac_trimmed.len() {
        0 => 1,
        1 => 10,
        2 => 100,
        3 => 1_000,
        4 => 10_000,
        5 => 100_000,
        _ => 1_000_000,
    };
    let numerator = if frac_trimmed.is_empty() {
        0
    } else {
        frac_trimmed.parse::<u64>().unwrap_or(0)
    };
    if numerator == 0 { (0, 1) } else { (numerator, scale) }
}

/// Shared observability handle: event bus plus optional logger/telemetry
/// sinks and the span recorder.
pub(crate) struct Observer {
    pub bus: Arc<EventBus>,
    pub logger: Option<Arc<dyn LoggerPort>>,
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
    pub spans: SpanRecorder,
}

impl Observer {
    /// Fast path: anything at all observing events?
    pub fn active(&self) -> bool {
        self.bus.listener_count() > 0 || self.logger.is_some() || self.telemetry.is_some()
    }

    /// Emit one event to every configured sink. Never raises.
    pub fn emit(&self, event: &RuntimeEvent) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let counter = match event.kind {
                EventKind::Dispatch => Some(DispatchCounter::Dispatches),
                EventKind::Requeue => Some(DispatchCounter::Requeues),
                EventKind::Drop => Some(DispatchCounter::Drops),
                EventKind::WorkerCrash => Some(DispatchCounter::WorkerCrashes),
                _ => None,
            };
            if let Some(counter) = counter {
                telemetry.count(counter, 1, Some(&event.task_id));
            }
            if let Some(duration_ms) = event.duration_ms {
                if event.kind != EventKind::Trace {
                    telemetry.record_duration_ms(
                        "task.dispatch.duration",
                        duration_ms,
                        Some(&event.task_id),
                    );
                }
            }
        }

        if let Some(logger) = self.logger.as_ref() {
            match event.kind {
                EventKind::WorkerStart => {
                    logger.worker_info(
                        "worker.start",
                        "Worker booted",
                        &event.task_id,
                        event.worker_id.as_ref(),
                    );
                },
                EventKind::WorkerStop => {
                    logger.worker_info(
                        "worker.stop",
                        "Worker stopped",
                        &event.task_id,
                        event.worker_id.as_ref(),
                    );
                },
                EventKind::WorkerCrash => {
                    let fields = event.error.as_ref().map(|error| {
                        let mut fields = LogFields::new();
                        fields.insert("errorCode".into(), json!(error.code.to_string()));
                        fields
                    });
                    logger.worker_error(
                        "worker.crash",
                        "Worker crashed",
                        &event.task_id,
                        event.worker_id.as_ref(),
                        fields,
                    );
                },
                _ => {},
            }
        }

        self.bus.emit(event);
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Observer")
            .field("bus", &self.bus)
            .field("logger", &self.logger.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_shared::TaskId;
    use std::sync::atomic::AtomicUsize;

    fn event() -> RuntimeEvent {
        RuntimeEvent::new(EventKind::Dispatch, TaskId::generate())
    }

    #[test]
    fn counters_round_trip_to_snapshot() {
        let counters = TaskCounters::default();
        counters.inc_dispatched();
        counters.inc_dispatched();
        counters.inc_settled();
        counters.inc_worker_crashes();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_dispatched, 2);
        assert_eq!(snapshot.total_settled, 1);
        assert_eq!(snapshot.worker_crash_total, 1);
        assert_eq!(snapshot.total_dropped, 0);
    }

    #[test]
    fn bus_delivers_to_subscribers_until_dropped() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);

        let subscription = bus.subscribe(Arc::new(move |_| {
            seen_in_listener.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(bus.listener_count(), 1);

        bus.emit(&event());
        assert_eq!(seen.load(Ordering::Relaxed), 1);

        drop(subscription);
        assert_eq!(bus.listener_count(), 0);
        bus.emit(&event());
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_listener_is_isolated_and_counted() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);

        let _bad = bus.subscribe(Arc::new(|_| panic!("listener bug")));
        let _good = bus.subscribe(Arc::new(move |_| {
            seen_in_listener.fetch_add(1, Ordering::Relaxed);
        }));

        bus.emit(&event());
        assert_eq!(seen.load(Ordering::Relaxed), 1, "healthy listener still runs");
        assert_eq!(bus.listener_errors(), 1);
    }

    #[test]
    fn span_recorder_respects_modes() {
        let off = SpanRecorder::new(SpanMode::Off);
        assert!(off.sample_dispatch().is_none());

        let on = SpanRecorder::new(SpanMode::On);
        assert!(on.sample_dispatch().is_some());

        let sampled = SpanRecorder::new(SpanMode::Sampled { rate: 0.5 });
        let hits = (0..1000)
            .filter(|_| sampled.sample_dispatch().is_some())
            .count();
        assert_eq!(hits, 500);
    }
}
