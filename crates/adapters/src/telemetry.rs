//! JSON telemetry adapter (counters, timings, and sampled span lines).

use crate::log_sink::LogSink;
use offload_ports::{DispatchCounter, TelemetryPort};
use offload_shared::TaskId;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Telemetry adapter that emits JSON lines. Recorded durations additionally
/// produce a span line when the sampler admits them.
#[derive(Clone)]
pub struct JsonTelemetry {
    sink: Arc<dyn LogSink>,
    sampler: Arc<SpanSampler>,
}

impl JsonTelemetry {
    /// Create a telemetry adapter backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            sampler: Arc::new(SpanSampler::new(1.0)),
        }
    }

    /// Set span sample rate (0.0 - 1.0). Default is 1.0.
    #[must_use]
    pub fn with_span_sample_rate(mut self, rate: f64) -> Self {
        self.sampler = Arc::new(SpanSampler::new(rate));
        self
    }
}

impl TelemetryPort for JsonTelemetry {
    fn count(&self, counter: DispatchCounter, value: u64, task_id: Option<&TaskId>) {
        let payload = metric_payload("counter", counter.name(), value, None, task_id);
        self.sink.write_line(&payload);
    }

    fn record_duration_ms(&self, name: &str, duration_ms: u64, task_id: Option<&TaskId>) {
        let payload = metric_payload("timer", name, duration_ms, Some("ms"), task_id);
        self.sink.write_line(&payload);

        if let Some(span_id) = self.sampler.sample_span_id() {
            let payload = span_payload(name, duration_ms, span_id, task_id);
            self.sink.write_line(&payload);
        }
    }
}

/// Deterministic span sampler: admits `numerator` of every `denominator`
/// recordings, counted per adapter instance.
pub struct SpanSampler {
    numerator: u64,
    denominator: u64,
    counter: AtomicU64,
}

impl SpanSampler {
    /// Build a sampler for the given rate in [0, 1].
    #[must_use]
    pub fn new(rate: f64) -> Self {
        let (numerator, denominator) = rate_fraction(rate);
        Self {
            numerator,
            denominator,
            counter: AtomicU64::new(1),
        }
    }

    /// Return a span id when this recording is sampled.
    pub fn sample_span_id(&self) -> Option<u64> {
        if self.numerator == 0 {
            return None;
        }
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        if self.numerator >= self.denominator {
            return Some(id);
        }
        if id % self.denominator < self.numerator {
            Some(id)
        } else {
            None
        }
    }
}

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

fn metric_payload(
    metric_type: &str,
    name: &str,
    value: u64,
    unit: Option<&str>,
    task_id: Option<&TaskId>,
) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("type".to_string(), Value::String("metric".to_string()));
    payload.insert("timestampMs".to_string(), Value::from(now_epoch_ms()));
    payload.insert(
        "metricType".to_string(),
        Value::String(metric_type.to_string()),
    );
    payload.insert("name".to_string(), Value::String(name.to_string()));
    payload.insert("value".to_string(), Value::from(value));
    if let Some(unit) = unit {
        payload.insert("unit".to_string(), Value::String(unit.to_string()));
    }
    if let Some(task_id) = task_id {
        payload.insert(
            "taskId".to_string(),
            Value::String(task_id.as_str().to_string()),
        );
    }
    to_line(payload)
}

fn span_payload(name: &str, duration_ms: u64, span_id: u64, task_id: Option<&TaskId>) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("type".to_string(), Value::String("span".to_string()));
    payload.insert("timestampMs".to_string(), Value::from(now_epoch_ms()));
    payload.insert("name".to_string(), Value::String(name.to_string()));
    payload.insert("spanId".to_string(), Value::from(span_id));
    payload.insert("durationMs".to_string(), Value::from(duration_ms));
    if let Some(task_id) = task_id {
        payload.insert(
            "taskId".to_string(),
            Value::String(task_id.as_str().to_string()),
        );
    }
    to_line(payload)
}

fn to_line(payload: serde_json::Map<String, Value>) -> String {
    serde_json::to_string(&Value::Object(payload)).map_or_else(
        |_| {
            "{\"type\":\"metric\",\"metricType\":\"error\",\"name\":\"telemetry.serialize_failed\",\"value\":1}\n"
                .to_string()
        },
        |mut encoded| {
            encoded.push('\n');
            encoded
        },
    )
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::MemoryLogSink;

    #[test]
    fn counters_carry_stable_names_and_task_ids() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemoryLogSink::default());
        let telemetry = JsonTelemetry::new(sink.clone()).with_span_sample_rate(0.0);

        let task_id = TaskId::parse("thumbs")?;
        telemetry.count(DispatchCounter::Dispatches, 2, Some(&task_id));

        let lines = sink.take();
        assert_eq!(lines.len(), 1);
        let parsed: Value = serde_json::from_str(lines.first().ok_or("missing line")?.trim())?;
        assert_eq!(parsed["metricType"], "counter");
        assert_eq!(parsed["name"], "task.dispatch.total");
        assert_eq!(parsed["value"], 2);
        assert_eq!(parsed["taskId"], "thumbs");
        Ok(())
    }

    #[test]
    fn sampled_durations_emit_a_span_line() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemoryLogSink::default());
        let telemetry = JsonTelemetry::new(sink.clone()).with_span_sample_rate(1.0);

        telemetry.record_duration_ms("task.dispatch.duration", 12, None);

        let lines = sink.take();
        assert_eq!(lines.len(), 2, "timer metric plus one span line");
        let span: Value = serde_json::from_str(lines.get(1).ok_or("missing span")?.trim())?;
        assert_eq!(span["type"], "span");
        assert_eq!(span["durationMs"], 12);
        Ok(())
    }

    #[test]
    fn zero_rate_suppresses_span_lines() {
        let sink = Arc::new(MemoryLogSink::default());
        let telemetry = JsonTelemetry::new(sink.clone()).with_span_sample_rate(0.0);

        telemetry.record_duration_ms("task.dispatch.duration", 5, None);
        assert_eq!(sink.len(), 1, "timer metric only");
    }

    #[test]
    fn sampler_admits_fraction_of_spans() {
        let sampler = SpanSampler::new(0.25);
        let sampled = (0..1000)
            .filter(|_| sampler.sample_span_id().is_some())
            .count();
        assert_eq!(sampled, 250);
    }
}
