//! Task handles: the method-call facade over the queue core.

use crate::queue::{KeyExtractor, TaskCore, TransferExtractor};
use crate::runtime::RuntimeInner;
use offload_domain::{CallDescriptor, DispatchOptions, Payload, TaskSnapshot, TransferOverride};
use offload_ports::WorkerFactory;
use offload_shared::{
    AbortSignal, CompositeGuard, DeadlineHandle, ErrorEnvelope, Result, TaskId,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// Collaborators a task is defined with: the worker factory plus optional
/// key and transferable extractors.
#[derive(Clone)]
pub struct TaskDeps {
    /// Produces workers for this task.
    pub factory: Arc<dyn WorkerFactory>,
    /// Derives a call-group key from unkeyed dispatches (parallel tasks).
    pub key_of: Option<KeyExtractor>,
    /// Replaces the default transferable extractor.
    pub transferables: Option<TransferExtractor>,
}

impl TaskDeps {
    /// Deps with just a factory.
    #[must_use]
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            key_of: None,
            transferables: None,
        }
    }

    /// Attach a key extractor.
    #[must_use]
    pub fn with_key_of(mut self, key_of: KeyExtractor) -> Self {
        self.key_of = Some(key_of);
        self
    }

    /// Attach a transferable extractor override.
    #[must_use]
    pub fn with_transferables(mut self, transferables: TransferExtractor) -> Self {
        self.transferables = Some(transferables);
        self
    }
}

impl std::fmt::Debug for TaskDeps {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TaskDeps")
            .field("keyOf", &self.key_of.is_some())
            .field("transferables", &self.transferables.is_some())
            .finish()
    }
}

/// Handle onto one defined task. Cloneable; all clones share the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    core: Arc<TaskCore>,
    runtime: Weak<RuntimeInner>,
}

impl TaskHandle {
    pub(crate) fn new(core: Arc<TaskCore>, runtime: Weak<RuntimeInner>) -> Self {
        Self { core, runtime }
    }

    /// The task's id.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.core.task_id
    }

    /// Begin a dispatch of `method`. The returned builder accepts arguments
    /// and per-call options; `dispatch()` submits it.
    #[must_use]
    pub fn call(&self, method: &str) -> CallBuilder {
        CallBuilder {
            core: Arc::clone(&self.core),
            method: Box::from(method),
            args: Payload::Null,
            options: DispatchOptions::default(),
        }
    }

    /// Point-in-time view of this task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.core.snapshot()
    }

    /// Boot all workers now instead of on first dispatch.
    pub fn start_workers(&self) {
        self.core.start_workers();
    }

    /// Drain in-flight calls cooperatively, then terminate workers. Queued
    /// calls stay queued and resume against fresh workers.
    pub async fn stop_workers(&self) {
        self.core.stop_workers().await;
    }

    /// Clear poisoning after a fail-task crash.
    pub fn restart(&self) {
        self.core.restart();
    }

    /// Remove the task from the runtime and terminate its workers. All
    /// queued and in-flight calls settle with `task:failed`. Idempotent.
    pub async fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_task(&self.core.task_id);
        }
        self.core.dispose().await;
    }
}

/// One pending dispatch under construction.
#[derive(Debug)]
pub struct CallBuilder {
    core: Arc<TaskCore>,
    method: Box<str>,
    args: Payload,
    options: DispatchOptions,
}

impl CallBuilder {
    /// Set the handler arguments.
    #[must_use]
    pub fn args(mut self, args: Payload) -> Self {
        self.args = args;
        self
    }

    /// Group this call under `key` for routing and keyed cancellation.
    #[must_use]
    pub fn key(mut self, key: impl AsRef<str>) -> Self {
        self.options.key = Some(Box::from(key.as_ref()));
        self
    }

    /// Attach an externally owned abort signal.
    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.options.signal = Some(signal);
        self
    }

    /// Per-call timeout override.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    /// Per-call transferable handoff override.
    #[must_use]
    pub fn transfer(mut self, transfer: TransferOverride) -> Self {
        self.options.transfer = transfer;
        self
    }

    /// Submit the call and await its settlement.
    pub async fn dispatch(self) -> Result<Payload> {
        self.core.submit(&self.method, self.args, self.options).await
    }
}

impl TaskCore {
    /// Materialize a descriptor, compose its abort inputs, and run the call
    /// through admission. Resolves when the queue core settles it.
    pub(crate) async fn submit(
        self: &Arc<Self>,
        method: &str,
        args: Payload,
        mut options: DispatchOptions,
    ) -> Result<Payload> {
        if options.key.is_none() {
            if let Some(key_of) = self.key_of.as_ref() {
                options.key = key_of(method, &args);
            }
        }

        // The effective abort source: external signal + key source + deadline,
        // first cause wins.
        let mut upstream = Vec::new();
        if let Some(signal) = options.signal.clone() {
            upstream.push(signal);
        }
        if let Some(key) = options.key.as_deref() {
            upstream.push(self.aborts.signal_for(key));
        }
        let timeout_ms = options.timeout_ms.or(self.config.default_timeout_ms);
        let deadline = timeout_ms.map(|ms| DeadlineHandle::start(Duration::from_millis(ms)));
        if let Some(deadline) = deadline.as_ref() {
            upstream.push(deadline.signal());
        }

        let (abort, guard) = if upstream.is_empty() {
            (AbortSignal::never(), CompositeGuard::empty())
        } else {
            AbortSignal::composite(&upstream)
        };

        let call_id = self.sequence.next();
        let descriptor = CallDescriptor::new(
            self.task_id.clone(),
            call_id,
            method,
            args,
            options,
            self.config.default_timeout_ms,
        );

        let (reply, settled) = oneshot::channel();
        let seat = self.seat(descriptor, reply, abort, guard, deadline);
        self.enqueue(seat);

        match settled.await {
            Ok(result) => result,
            Err(_) => Err(ErrorEnvelope::task_failed(
                "task dropped before settlement",
            )),
        }
    }
}
