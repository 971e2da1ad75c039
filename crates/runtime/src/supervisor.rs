//! Worker supervision: boot, idle-stop, crash detection, teardown.
//!
//! One supervisor owns one worker slot. Boots are serialized through a
//! state machine (`Stopped -> Starting -> Running`) so concurrent dispatches
//! during a cold start share the same boot instead of racing the factory.

use crate::executor::WorkerDispatch;
use crate::queue::TaskCore;
use offload_domain::{Payload, WorkerState};
use offload_ports::{InvokeRequest, WorkerFactory, WorkerPort};
use offload_shared::{CallId, ErrorEnvelope, Result, WorkerId};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub(crate) struct Supervisor {
    task: Weak<TaskCore>,
    factory: Arc<dyn WorkerFactory>,
    slot: usize,
    idle_timeout: Option<Duration>,
    restart_on_crash: bool,
    state: Mutex<SupervisorState>,
    boot_notify: Notify,
}

struct SupervisorState {
    worker: WorkerState,
    port: Option<Arc<dyn WorkerPort>>,
    worker_id: Option<WorkerId>,
    in_flight: usize,
    /// Increments on every boot/teardown so stale watchers and idle timers
    /// can detect they outlived their worker.
    epoch: u64,
    idle_timer: Option<JoinHandle<()>>,
    crash_watch: Option<JoinHandle<()>>,
}

impl SupervisorState {
    fn clear_timers(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        if let Some(watch) = self.crash_watch.take() {
            watch.abort();
        }
    }
}

enum BootAction {
    Use(Arc<dyn WorkerPort>),
    Boot,
    Wait,
    Refuse,
}

impl Supervisor {
    pub fn new(
        task: Weak<TaskCore>,
        factory: Arc<dyn WorkerFactory>,
        slot: usize,
        idle_timeout_ms: Option<u64>,
        restart_on_crash: bool,
    ) -> Self {
        Self {
            task,
            factory,
            slot,
            idle_timeout: idle_timeout_ms.map(Duration::from_millis),
            restart_on_crash,
            state: Mutex::new(SupervisorState {
                worker: WorkerState::Stopped,
                port: None,
                worker_id: None,
                in_flight: 0,
                epoch: 0,
                idle_timer: None,
                crash_watch: None,
            }),
            boot_notify: Notify::new(),
        }
    }

    /// Fire-and-forget boot, used for eager init and explicit start.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.ensure_worker().await;
        });
    }

    /// Hand one call to this worker. Completion flows back into the queue
    /// core via `on_worker_result`; this never blocks the caller.
    pub fn dispatch_async(self: &Arc<Self>, dispatch: WorkerDispatch) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let call_id = dispatch.call_id;
            let result = this.run_dispatch(dispatch).await;
            if let Some(task) = this.task.upgrade() {
                task.on_worker_result(call_id, result);
            }
        });
    }

    /// Forward a cooperative cancel to the live worker, if any.
    pub fn cancel_call(&self, call_id: CallId) {
        let port = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.port.clone()
        };
        if let Some(port) = port {
            port.cancel(call_id);
        }
    }

    /// Kill the worker without ceremony (cancel-grace escalation). In-flight
    /// invokes reject through the port and follow the crash policy; the next
    /// dispatch boots a fresh worker lazily.
    pub fn force_terminate(self: &Arc<Self>) {
        let (port, worker_id) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(port) = state.port.take() else {
                return;
            };
            state.clear_timers();
            state.worker = WorkerState::Stopped;
            state.in_flight = 0;
            state.epoch += 1;
            (port, state.worker_id.take())
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            port.terminate().await;
            if let Some(task) = this.task.upgrade() {
                task.note_worker_stopped(worker_id, "cancel-escalation");
            }
        });
    }

    /// Graceful teardown after the queue drained (explicit stop).
    pub fn stop(self: &Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
        self.teardown(WorkerState::Stopped, "stop")
    }

    /// Dispose-time teardown; the slot refuses further boots.
    pub fn shutdown(self: &Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
        self.teardown(WorkerState::Terminated, "dispose")
    }

    fn teardown(
        self: &Arc<Self>,
        final_state: WorkerState,
        reason: &'static str,
    ) -> impl Future<Output = ()> + Send + 'static {
        let (port, worker_id) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.clear_timers();
            state.worker = final_state;
            state.in_flight = 0;
            state.epoch += 1;
            (state.port.take(), state.worker_id.take())
        };
        self.boot_notify.notify_waiters();
        let this = Arc::clone(self);
        async move {
            if let Some(port) = port {
                port.terminate().await;
                if let Some(task) = this.task.upgrade() {
                    task.note_worker_stopped(worker_id, reason);
                }
            }
        }
    }

    /// Point-in-time view for snapshots.
    pub fn snapshot(&self) -> (WorkerState, Option<WorkerId>, usize) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.worker, state.worker_id.clone(), state.in_flight)
    }

    async fn run_dispatch(self: &Arc<Self>, dispatch: WorkerDispatch) -> Result<Payload> {
        let port = self.ensure_worker().await?;
        self.begin_call();
        let request = InvokeRequest {
            call_id: dispatch.call_id,
            method: dispatch.method,
            args: dispatch.args,
            transferables: dispatch.transferables,
        };
        let result = port.invoke(request).await;
        self.end_call();
        result
    }

    async fn ensure_worker(self: &Arc<Self>) -> Result<Arc<dyn WorkerPort>> {
        loop {
            let notified = self.boot_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let action = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                match state.worker {
                    // A port whose crash signal already fired is stale: the
                    // crash watcher may not have run yet, but dispatching
                    // into the dead channel would burn a retry attempt.
                    WorkerState::Running => match state.port.clone() {
                        Some(port) if !port.crashed().is_aborted() => BootAction::Use(port),
                        _ => {
                            state.worker = WorkerState::Starting;
                            BootAction::Boot
                        },
                    },
                    WorkerState::Starting => BootAction::Wait,
                    WorkerState::Terminated => BootAction::Refuse,
                    WorkerState::Stopped | WorkerState::Crashing => {
                        state.worker = WorkerState::Starting;
                        BootAction::Boot
                    },
                }
            };

            match action {
                BootAction::Use(port) => return Ok(port),
                BootAction::Refuse => {
                    return Err(ErrorEnvelope::task_failed("task disposed"));
                },
                BootAction::Wait => {
                    notified.await;
                },
                BootAction::Boot => return self.boot().await,
            }
        }
    }

    async fn boot(self: &Arc<Self>) -> Result<Arc<dyn WorkerPort>> {
        // Transient boot failures get a single immediate retry.
        let booted = match self.factory.create().await {
            Ok(port) => Ok(port),
            Err(first) => self.factory.create().await.map_err(|_| first),
        };

        match booted {
            Ok(port) => {
                let worker_id = port.worker_id();
                {
                    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.worker = WorkerState::Running;
                    state.port = Some(Arc::clone(&port));
                    state.worker_id = Some(worker_id.clone());
                    state.epoch += 1;
                    let epoch = state.epoch;
                    state.crash_watch =
                        Some(self.spawn_crash_watch(&port, worker_id.clone(), epoch));
                }
                self.boot_notify.notify_waiters();
                if let Some(task) = self.task.upgrade() {
                    task.note_worker_started(worker_id);
                }
                Ok(port)
            },
            Err(error) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.worker = WorkerState::Stopped;
                }
                self.boot_notify.notify_waiters();
                Err(ErrorEnvelope::worker_crashed(format!(
                    "worker boot failed: {}",
                    error.message
                )))
            },
        }
    }

    fn spawn_crash_watch(
        self: &Arc<Self>,
        port: &Arc<dyn WorkerPort>,
        worker_id: WorkerId,
        epoch: u64,
    ) -> JoinHandle<()> {
        let signal = port.crashed();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let cause = signal.aborted().await;
            this.on_crash(epoch, worker_id, cause.message.as_deref().unwrap_or("worker fault"));
        })
    }

    fn on_crash(self: &Arc<Self>, epoch: u64, worker_id: WorkerId, message: &str) {
        // State cleanup is epoch-guarded (a redispatch may already have
        // booted a replacement), but the crash itself is always reported:
        // each watcher fires at most once per worker instance.
        let cleaned = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.epoch == epoch {
                state.worker = WorkerState::Crashing;
                state.port = None;
                state.worker_id = None;
                state.clear_timers();
                state.in_flight = 0;
                state.epoch += 1;
                state.worker = WorkerState::Stopped;
                true
            } else {
                false
            }
        };
        if cleaned {
            self.boot_notify.notify_waiters();
        }
        if let Some(task) = self.task.upgrade() {
            task.on_worker_crash(self.slot, worker_id, message);
        }
        if cleaned && self.restart_on_crash {
            self.start();
        }
    }

    fn begin_call(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight += 1;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
    }

    fn end_call(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 && state.worker == WorkerState::Running {
            self.arm_idle_timer(&mut state);
        }
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut SupervisorState) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        if let Some(previous) = state.idle_timer.take() {
            previous.abort();
        }
        let this = Arc::clone(self);
        let epoch = state.epoch;
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.try_idle_stop(epoch).await;
        }));
    }

    async fn try_idle_stop(self: &Arc<Self>, epoch: u64) {
        let queues_idle = self
            .task
            .upgrade()
            .is_some_and(|task| task.queues_idle());

        let port_and_id = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.epoch != epoch
                || state.in_flight > 0
                || state.worker != WorkerState::Running
            {
                return;
            }
            if !queues_idle {
                // Work is queued but not yet here; check again in a window.
                self.arm_idle_timer(&mut state);
                return;
            }
            state.clear_timers();
            state.worker = WorkerState::Stopped;
            state.epoch += 1;
            (state.port.take(), state.worker_id.take())
        };
        self.boot_notify.notify_waiters();

        if let (Some(port), worker_id) = port_and_id {
            port.terminate().await;
            if let Some(task) = self.task.upgrade() {
                task.note_worker_stopped(worker_id, "idle");
            }
        }
    }

}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (worker, worker_id, in_flight) = self.snapshot();
        formatter
            .debug_struct("Supervisor")
            .field("slot", &self.slot)
            .field("state", &worker)
            .field("workerId", &worker_id)
            .field("inFlight", &in_flight)
            .finish()
    }
}
