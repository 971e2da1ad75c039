//! Structured JSON logger adapter.

use crate::log_sink::LogSink;
use offload_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// JSON logger emitting one line per event.
#[derive(Clone)]
pub struct JsonLogger {
    sink: Arc<dyn LogSink>,
    base_fields: LogFields,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Create a JSON logger backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Set base fields applied to every event.
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Set the minimum log level.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl LoggerPort for JsonLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }

        let mut fields = self.base_fields.clone();
        if let Some(extra) = event.fields {
            for (key, value) in extra {
                fields.insert(key, value);
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert("timestampMs".to_string(), Value::from(now_epoch_ms()));
        payload.insert(
            "level".to_string(),
            Value::String(event.level.as_str().to_string()),
        );
        payload.insert("event".to_string(), Value::String(event.event.to_string()));
        payload.insert(
            "message".to_string(),
            Value::String(event.message.to_string()),
        );
        if let Some(task_id) = event.task_id {
            payload.insert(
                "taskId".to_string(),
                Value::String(task_id.as_str().to_string()),
            );
        }
        if let Some(worker_id) = event.worker_id {
            payload.insert(
                "workerId".to_string(),
                Value::String(worker_id.as_str().to_string()),
            );
        }
        if !fields.is_empty() {
            payload.insert("fields".to_string(), fields_to_json(&fields));
        }
        if let Some(error) = event.error {
            payload.insert("error".to_string(), error);
        }

        let line = serde_json::to_string(&Value::Object(payload)).map_or_else(
            |_| {
                "{\"timestampMs\":0,\"level\":\"error\",\"event\":\"logger.serialize_failed\",\"message\":\"log serialization failed\"}\n"
                    .to_string()
            },
            |mut encoded| {
                encoded.push('\n');
                encoded
            },
        );
        self.sink.write_line(&line);
    }
}

fn fields_to_json(fields: &LogFields) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in fields {
        map.insert(key.to_string(), value.clone());
    }
    Value::Object(map)
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
    use offload_shared::{TaskId, WorkerId};
    use serde_json::json;

    #[test]
    fn logger_stamps_task_and_worker_identity() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemoryLogSink::default());
        let logger = JsonLogger::new(sink.clone()).with_min_level(LogLevel::Debug);

        let task_id = TaskId::parse("thumbs")?;
        let worker_id = WorkerId::generate();
        logger.worker_info("worker.start", "Worker booted", &task_id, Some(&worker_id));

        let lines = sink.take();
        assert_eq!(lines.len(), 1);
        let line = lines.first().ok_or("missing line")?;
        let parsed: Value = serde_json::from_str(line.trim())?;
        assert_eq!(parsed["event"], "worker.start");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["taskId"], "thumbs");
        assert_eq!(parsed["workerId"], worker_id.as_str());
        Ok(())
    }

    #[test]
    fn min_level_filters_events() {
        let sink = Arc::new(MemoryLogSink::default());
        let logger = JsonLogger::new(sink.clone()).with_min_level(LogLevel::Warn);
        let task_id = TaskId::generate();

        logger.log(LogEvent::new(LogLevel::Debug, "noise", "filtered"));
        logger.task_info("noise", "filtered", &task_id, None);
        logger.task_error("task.poisoned", "kept", &task_id, None);

        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn base_fields_merge_under_event_fields() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemoryLogSink::default());
        let mut base = LogFields::new();
        base.insert("deployment".into(), json!("staging"));
        let logger = JsonLogger::new(sink.clone()).with_base_fields(base);

        let mut fields = LogFields::new();
        fields.insert("queuePolicy".into(), json!("block"));
        logger.task_info(
            "runtime.task.defined",
            "Task defined",
            &TaskId::generate(),
            Some(fields),
        );

        let lines = sink.take();
        let parsed: Value = serde_json::from_str(lines.first().ok_or("missing line")?.trim())?;
        assert_eq!(parsed["fields"]["deployment"], "staging");
        assert_eq!(parsed["fields"]["queuePolicy"], "block");
        Ok(())
    }
}
