//! The runtime: task registry, shared abort controller, snapshots,
//! subscriptions, and trace scopes.

use crate::executor::{ExecutorStrategy, PoolExecutor, SingletonExecutor};
use crate::observability::{EventBus, EventSubscription, Observer, SpanRecorder};
use crate::queue::TaskCore;
use crate::supervisor::Supervisor;
use crate::task::{TaskDeps, TaskHandle};
use offload_domain::{
    CrashPolicy, EventKind, InitMode, RuntimeEvent, RuntimeSnapshot, SpanMode, TaskConfig,
    TaskKind, now_epoch_ms,
};
use offload_ports::{LogFields, LoggerPort, TelemetryPort, WorkerFactory};
use offload_shared::{
    AbortRegistry, ErrorCode, ErrorEnvelope, Result, TaskId,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runtime-level configuration.
#[derive(Clone, Default)]
pub struct RuntimeConfig {
    /// Default span mode for tasks without an override.
    pub spans: SpanMode,
    /// Structured logging sink; absent is silent.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Metrics sink; absent is a no-op.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RuntimeConfig")
            .field("spans", &self.spans)
            .field("logger", &self.logger.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

pub(crate) struct RuntimeInner {
    tasks: Mutex<BTreeMap<Box<str>, Arc<TaskCore>>>,
    aborts: Arc<AbortRegistry>,
    bus: Arc<EventBus>,
    spans: SpanMode,
    logger: Option<Arc<dyn LoggerPort>>,
    telemetry: Option<Arc<dyn TelemetryPort>>,
    observer: Arc<Observer>,
    trace_scope: TaskId,
}

impl RuntimeInner {
    pub(crate) fn remove_task(&self, task_id: &TaskId) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.remove(task_id.as_str());
        if let Some(logger) = self.logger.as_ref() {
            logger.task_info("runtime.task.disposed", "Task disposed", task_id, None);
        }
    }

    fn snapshot(&self) -> RuntimeSnapshot {
        let cores: Vec<Arc<TaskCore>> = {
            let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.values().cloned().collect()
        };
        RuntimeSnapshot::new(cores.iter().map(|core| core.snapshot()).collect())
    }
}

/// The task runtime: registry of tasks plus the shared abort controller
/// and observability surface.
#[derive(Clone)]
pub struct TaskRuntime {
    inner: Arc<RuntimeInner>,
}

impl TaskRuntime {
    /// Create a runtime. Fails on invalid observability configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        if let SpanMode::Sampled { rate } = config.spans {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("span sampleRate {rate} is outside [0, 1]"),
                ));
            }
        }
        let bus = Arc::new(EventBus::new());
        let observer = Arc::new(Observer {
            bus: Arc::clone(&bus),
            logger: config.logger.clone(),
            telemetry: config.telemetry.clone(),
            spans: SpanRecorder::new(config.spans),
        });
        let trace_scope =
            TaskId::parse("runtime").unwrap_or_else(|_| TaskId::generate());
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                tasks: Mutex::new(BTreeMap::new()),
                aborts: Arc::new(AbortRegistry::new()),
                bus,
                spans: config.spans,
                logger: config.logger,
                telemetry: config.telemetry,
                observer,
                trace_scope,
            }),
        })
    }

    /// Define a task: validate config, build its queue core, executor, and
    /// supervisors, and register it. Must be called within a Tokio runtime.
    pub fn define_task(&self, config: TaskConfig, deps: TaskDeps) -> Result<TaskHandle> {
        config.validate().map_err(ErrorEnvelope::from)?;

        let task_id = match config.task_id.as_deref() {
            Some(raw) => TaskId::parse(raw)?,
            None => TaskId::generate(),
        };
        {
            let tasks = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if tasks.contains_key(task_id.as_str()) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("taskId {task_id} is already defined"),
                ));
            }
        }

        let span_mode = config
            .observability
            .and_then(|overrides| overrides.spans)
            .unwrap_or(self.inner.spans);
        let observer = Arc::new(Observer {
            bus: Arc::clone(&self.inner.bus),
            logger: self.inner.logger.clone(),
            telemetry: self.inner.telemetry.clone(),
            spans: SpanRecorder::new(span_mode),
        });

        let eager = config.init == InitMode::Eager;
        let aborts = Arc::clone(&self.inner.aborts);
        let core = Arc::new_cyclic(|weak: &Weak<TaskCore>| {
            let executor = build_executor(weak.clone(), &config, &deps.factory);
            TaskCore::new(
                task_id.clone(),
                config,
                aborts,
                observer,
                deps.key_of,
                deps.transferables,
                executor,
            )
        });

        {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if tasks.contains_key(task_id.as_str()) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("taskId {task_id} is already defined"),
                ));
            }
            tasks.insert(Box::from(task_id.as_str()), Arc::clone(&core));
        }

        if eager {
            core.start_workers();
        }

        if let Some(logger) = self.inner.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("kind".into(), json!(core.config.kind.name()));
            fields.insert("queuePolicy".into(), json!(core.config.queue_policy.name()));
            logger.task_info("runtime.task.defined", "Task defined", &task_id, Some(fields));
        }

        Ok(TaskHandle::new(core, Arc::downgrade(&self.inner)))
    }

    /// Point-in-time view of every registered task.
    #[must_use]
    pub fn runtime_snapshot(&self) -> RuntimeSnapshot {
        self.inner.snapshot()
    }

    /// The shared keyed cancellation controller.
    #[must_use]
    pub fn abort_controller(&self) -> Arc<AbortRegistry> {
        Arc::clone(&self.inner.aborts)
    }

    /// Observe the event stream. The subscription detaches on drop.
    pub fn subscribe_events<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(Arc::new(listener))
    }

    /// Poll snapshots on an interval. The subscription detaches on drop.
    pub fn subscribe_snapshot<F>(
        &self,
        options: SnapshotSubscriptionOptions,
        listener: F,
    ) -> SnapshotSubscription
    where
        F: Fn(&RuntimeSnapshot) + Send + Sync + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        let interval = Duration::from_millis(options.interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut last_digest: Option<u64> = None;
            if options.emit_immediately {
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                let snapshot = strong.snapshot();
                last_digest = Some(snapshot.digest());
                listener(&snapshot);
            }
            loop {
                tokio::time::sleep(interval).await;
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                let snapshot = strong.snapshot();
                let digest = snapshot.digest();
                if options.only_on_change && last_digest == Some(digest) {
                    continue;
                }
                last_digest = Some(digest);
                listener(&snapshot);
            }
        });
        SnapshotSubscription { handle }
    }

    /// Run `future` inside a named trace scope, emitting start and end
    /// events with the outcome status.
    pub async fn run_with_trace<T, F>(&self, name: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let observed = self.inner.observer.active();
        let sampled = self.inner.observer.spans.sample_dispatch();

        if observed {
            self.inner.observer.emit(
                &RuntimeEvent::new(EventKind::Trace, self.inner.trace_scope.clone())
                    .with_trace(name, "started"),
            );
        }

        let started_ms = now_epoch_ms();
        let result = future.await;
        let duration_ms = now_epoch_ms().saturating_sub(started_ms);
        let status = if result.is_ok() { "ok" } else { "error" };

        if observed {
            self.inner.observer.emit(
                &RuntimeEvent::new(EventKind::Trace, self.inner.trace_scope.clone())
                    .with_trace(name, status)
                    .with_duration_ms(duration_ms),
            );
        }
        if sampled.is_some() {
            if let Some(telemetry) = self.inner.telemetry.as_ref() {
                telemetry.record_duration_ms(&format!("trace.{name}"), duration_ms, None);
            }
        }

        result
    }
}

impl std::fmt::Debug for TaskRuntime {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        formatter
            .debug_struct("TaskRuntime")
            .field("tasks", &tasks.len())
            .finish()
    }
}

/// Options for snapshot subscriptions.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSubscriptionOptions {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Emit one snapshot immediately on subscribe.
    pub emit_immediately: bool,
    /// Suppress emissions whose digest matches the previous one.
    pub only_on_change: bool,
}

impl Default for SnapshotSubscriptionOptions {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            emit_immediately: false,
            only_on_change: false,
        }
    }
}

/// Cancels its polling task when dropped.
#[derive(Debug)]
pub struct SnapshotSubscription {
    handle: JoinHandle<()>,
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_executor(
    task: Weak<TaskCore>,
    config: &TaskConfig,
    factory: &Arc<dyn WorkerFactory>,
) -> Box<dyn ExecutorStrategy> {
    let restart_on_crash = config.crash_policy == CrashPolicy::RestartRequeueInFlight;
    match config.kind {
        TaskKind::Singleton => {
            let supervisor = Arc::new(Supervisor::new(
                task,
                Arc::clone(factory),
                0,
                config.idle_timeout_ms,
                restart_on_crash,
            ));
            Box::new(SingletonExecutor::new(supervisor))
        },
        TaskKind::Parallel => {
            let slots = (0..config.pool_size)
                .map(|slot| {
                    Arc::new(Supervisor::new(
                        task.clone(),
                        Arc::clone(factory),
                        slot,
                        config.idle_timeout_ms,
                        restart_on_crash,
                    ))
                })
                .collect();
            Box::new(PoolExecutor::new(slots, config.effective_max_in_flight()))
        },
    }
}
