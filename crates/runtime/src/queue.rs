//! The per-task queue core: admission, promotion, settlement, cancellation,
//! and crash recovery over a single state model.
//!
//! All state transitions run under one lock and queue their externally
//! visible effects (promise settlement, worker dispatch, event emission)
//! for execution after the lock is released. Cascades (settlement triggers
//! promotion triggers re-dispatch) therefore never expose half-updated state, and
//! effect handlers are free to re-enter the core.

use crate::executor::{ExecutorStrategy, WorkerDispatch};
use crate::observability::{Observer, TaskCounters};
use offload_domain::{
    CallDescriptor, CallPhase, CrashPolicy, EventKind, Payload, QueuePolicy, RuntimeEvent,
    TaskConfig, TaskLifecycle, TaskSnapshot, TransferList, TransferMode, WorkerSnapshot,
    detach_blobs, extract_transferables,
};
use offload_shared::{
    AbortCause, AbortReason, AbortRegistry, AbortSignal, CallId, CallSequence, CompositeGuard,
    DeadlineHandle, ErrorEnvelope, Result, TaskId, WorkerId,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

pub(crate) type ReplySender = oneshot::Sender<Result<Payload>>;

/// Key extractor applied to unkeyed dispatches on parallel tasks.
pub type KeyExtractor = Arc<dyn Fn(&str, &Payload) -> Option<Box<str>> + Send + Sync>;

/// Per-task override of the default transferable extractor.
pub type TransferExtractor = Arc<dyn Fn(&Payload) -> TransferList + Send + Sync>;

/// A call resident in the queues, together with everything needed to settle
/// it exactly once and to tear down its abort plumbing.
pub(crate) struct CallSeat {
    descriptor: CallDescriptor,
    reply: ReplySender,
    abort: AbortSignal,
    /// Composite upstream observers; detach when the seat drops.
    _guard: CompositeGuard,
    /// Deadline timer; discarded when the seat drops.
    _deadline: Option<DeadlineHandle>,
    watcher: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
    attempts: u32,
    cancel_requested: bool,
    span_started: Option<Instant>,
}

impl CallSeat {
    fn finish(mut self) -> (ReplySender, Option<Instant>) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(grace) = self.grace.take() {
            grace.abort();
        }
        (self.reply, self.span_started)
    }
}

struct QueueState {
    lifecycle: TaskLifecycle,
    waiting: VecDeque<CallSeat>,
    pending: VecDeque<CallSeat>,
    in_flight: Vec<CallSeat>,
    draining: bool,
}

enum Outcome {
    Fulfilled(Payload),
    Canceled(ErrorEnvelope),
    Rejected(ErrorEnvelope),
    Dropped(ErrorEnvelope),
}

enum Effect {
    Event(RuntimeEvent),
    Reply {
        reply: ReplySender,
        result: Result<Payload>,
    },
    Dispatch(WorkerDispatch),
    CancelForward(CallId),
    Escalate(CallId),
    Settled(CallId),
}

/// Shared core of one task: configuration, queue state, executor wiring,
/// and observability handles.
pub(crate) struct TaskCore {
    pub(crate) task_id: TaskId,
    pub(crate) config: TaskConfig,
    pub(crate) aborts: Arc<AbortRegistry>,
    pub(crate) observer: Arc<Observer>,
    pub(crate) counters: TaskCounters,
    pub(crate) sequence: CallSequence,
    pub(crate) key_of: Option<KeyExtractor>,
    pub(crate) transfer_fn: Option<TransferExtractor>,
    executor: Box<dyn ExecutorStrategy>,
    state: Mutex<QueueState>,
    idle_notify: Notify,
}

impl TaskCore {
    pub fn new(
        task_id: TaskId,
        config: TaskConfig,
        aborts: Arc<AbortRegistry>,
        observer: Arc<Observer>,
        key_of: Option<KeyExtractor>,
        transfer_fn: Option<TransferExtractor>,
        executor: Box<dyn ExecutorStrategy>,
    ) -> Self {
        Self {
            task_id,
            config,
            aborts,
            observer,
            counters: TaskCounters::default(),
            sequence: CallSequence::new(),
            key_of,
            transfer_fn,
            executor,
            state: Mutex::new(QueueState {
                lifecycle: TaskLifecycle::Active,
                waiting: VecDeque::new(),
                pending: VecDeque::new(),
                in_flight: Vec::new(),
                draining: false,
            }),
            idle_notify: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Admit one call. The seat's reply channel is settled exactly once,
    /// here or later.
    pub fn enqueue(self: &Arc<Self>, seat: CallSeat) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();

            if !state.lifecycle.accepts_calls() {
                self.settle(
                    seat,
                    Outcome::Rejected(ErrorEnvelope::task_failed("task is not accepting calls")),
                    None,
                    &mut effects,
                );
                drop(state);
                self.run_effects(effects);
                return;
            }

            if let Some(cause) = seat.abort.cause() {
                self.settle(
                    seat,
                    Outcome::Canceled(abort_envelope(&cause)),
                    Some(CallPhase::Created),
                    &mut effects,
                );
                drop(state);
                self.run_effects(effects);
                return;
            }

            let pending_full = self
                .config
                .max_pending
                .is_some_and(|cap| state.pending.len() >= cap);

            if pending_full {
                match self.config.queue_policy {
                    QueuePolicy::Block => {
                        let waiting_full = self
                            .config
                            .max_waiting
                            .is_some_and(|cap| state.waiting.len() >= cap);
                        if waiting_full {
                            self.settle(
                                seat,
                                Outcome::Rejected(ErrorEnvelope::queue_full(
                                    "waiting queue depth cap reached",
                                )),
                                None,
                                &mut effects,
                            );
                        } else {
                            state.waiting.push_back(seat);
                        }
                    },
                    QueuePolicy::Reject => {
                        self.settle(
                            seat,
                            Outcome::Rejected(ErrorEnvelope::queue_full(
                                "pending queue depth cap reached",
                            )),
                            None,
                            &mut effects,
                        );
                    },
                    QueuePolicy::DropOldest => match state.pending.pop_front() {
                        Some(evicted) => {
                            self.settle(
                                evicted,
                                Outcome::Dropped(ErrorEnvelope::dropped(
                                    "evicted by a newer call (drop-oldest)",
                                )),
                                None,
                                &mut effects,
                            );
                            state.pending.push_back(seat);
                        },
                        None => {
                            // Zero-cap pending: nothing to evict, nowhere to sit.
                            self.settle(
                                seat,
                                Outcome::Dropped(ErrorEnvelope::dropped(
                                    "pending queue has no capacity",
                                )),
                                None,
                                &mut effects,
                            );
                        },
                    },
                    QueuePolicy::DropLatest => {
                        self.settle(
                            seat,
                            Outcome::Dropped(ErrorEnvelope::dropped(
                                "pending queue full (drop-latest)",
                            )),
                            None,
                            &mut effects,
                        );
                    },
                }
            } else {
                state.pending.push_back(seat);
            }

            self.rebalance(&mut state, &mut effects);
        }
        self.run_effects(effects);
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    fn refill_from_waiting(&self, state: &mut QueueState) {
        while !state.waiting.is_empty() {
            let has_room = !self
                .config
                .max_pending
                .is_some_and(|cap| state.pending.len() >= cap);
            if !has_room {
                break;
            }
            if let Some(seat) = state.waiting.pop_front() {
                state.pending.push_back(seat);
            }
        }
    }

    fn rebalance(&self, state: &mut QueueState, effects: &mut Vec<Effect>) {
        if !state.lifecycle.accepts_calls() {
            return;
        }
        self.refill_from_waiting(state);
        let max_in_flight = self.config.effective_max_in_flight();
        while !state.draining && state.in_flight.len() < max_in_flight {
            let Some(mut seat) = state.pending.pop_front() else {
                break;
            };
            seat.attempts += 1;
            seat.span_started = self.observer.spans.sample_dispatch();
            self.counters.inc_dispatched();
            if self.observer.active() {
                effects.push(Effect::Event(
                    RuntimeEvent::new(EventKind::Dispatch, self.task_id.clone())
                        .with_call(seat.descriptor.call_id, seat.descriptor.method.clone())
                        .with_key(seat.descriptor.key.clone())
                        .with_attempts(seat.attempts),
                ));
            }
            effects.push(Effect::Dispatch(self.build_dispatch(&seat)));
            state.in_flight.push(seat);
            self.refill_from_waiting(state);
        }
    }

    fn build_dispatch(&self, seat: &CallSeat) -> WorkerDispatch {
        let descriptor = &seat.descriptor;
        let (args, transferables) = match descriptor.transfer.args_mode() {
            TransferMode::Keep => (detach_blobs(&descriptor.args), TransferList::default()),
            TransferMode::Transfer => {
                let args = descriptor.args.clone();
                let list = self
                    .transfer_fn
                    .as_ref()
                    .map_or_else(|| extract_transferables(&args), |extract| extract(&args));
                (args, list)
            },
        };
        WorkerDispatch {
            call_id: descriptor.call_id,
            method: descriptor.method.clone(),
            args,
            transferables,
            key: descriptor.key.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Worker completion for one dispatched call. Ignored when the seat is
    /// already settled (grace escalation, crash sweep, disposal).
    pub fn on_worker_result(self: &Arc<Self>, call_id: CallId, result: Result<Payload>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            let Some(index) = state
                .in_flight
                .iter()
                .position(|seat| seat.descriptor.call_id == call_id)
            else {
                return;
            };
            let seat = state.in_flight.remove(index);

            match result {
                Ok(value) => {
                    let value = match seat.descriptor.transfer.result_mode() {
                        TransferMode::Keep => detach_blobs(&value),
                        TransferMode::Transfer => value,
                    };
                    self.settle(seat, Outcome::Fulfilled(value), None, &mut effects);
                },
                Err(error) if error.is_worker_crash() => {
                    self.recover_crashed_seat(&mut state, seat, error, &mut effects);
                },
                Err(error) if error.is_abort_shaped() => {
                    // First cause wins over whatever shape the handler chose.
                    let envelope = seat
                        .abort
                        .cause()
                        .map_or(error, |cause| abort_envelope(&cause));
                    self.settle(
                        seat,
                        Outcome::Canceled(envelope),
                        Some(CallPhase::InFlight),
                        &mut effects,
                    );
                },
                Err(error) => {
                    self.settle(seat, Outcome::Rejected(error), None, &mut effects);
                },
            }

            if state.in_flight.is_empty() {
                self.idle_notify.notify_waiters();
            }
            self.rebalance(&mut state, &mut effects);
        }
        self.run_effects(effects);
    }

    fn recover_crashed_seat(
        self: &Arc<Self>,
        state: &mut QueueState,
        mut seat: CallSeat,
        error: ErrorEnvelope,
        effects: &mut Vec<Effect>,
    ) {
        match self.config.crash_policy {
            CrashPolicy::RestartFailInFlight => {
                self.settle(seat, Outcome::Rejected(error), None, effects);
            },
            CrashPolicy::RestartRequeueInFlight => {
                let attempt_cap = u64::from(self.config.crash_max_retries);
                if u64::from(seat.attempts) < attempt_cap {
                    seat.span_started = None;
                    self.counters.inc_requeued();
                    if self.observer.active() {
                        effects.push(Effect::Event(
                            RuntimeEvent::new(EventKind::Requeue, self.task_id.clone())
                                .with_call(seat.descriptor.call_id, seat.descriptor.method.clone())
                                .with_attempts(seat.attempts),
                        ));
                    }
                    effects.push(Effect::Settled(seat.descriptor.call_id));
                    state.pending.push_front(seat);
                } else {
                    let exhausted = ErrorEnvelope::worker_crashed(format!(
                        "crash retry attempts exhausted after {} dispatches",
                        seat.attempts
                    ))
                    .with_metadata("attempts", seat.attempts.to_string())
                    .with_metadata("lastError", error.message);
                    self.settle(seat, Outcome::Rejected(exhausted), None, effects);
                }
            },
            CrashPolicy::FailTask => {
                self.settle(
                    seat,
                    Outcome::Rejected(ErrorEnvelope::task_failed(
                        "task poisoned by worker crash",
                    )),
                    None,
                    effects,
                );
                self.poison(state, effects);
            },
        }
    }

    /// Poison the task: fail everything queued, reject future enqueues.
    fn poison(&self, state: &mut QueueState, effects: &mut Vec<Effect>) {
        if state.lifecycle == TaskLifecycle::Poisoned {
            return;
        }
        state.lifecycle = TaskLifecycle::Poisoned;
        if let Some(logger) = self.observer.logger.as_ref() {
            logger.task_error(
                "task.poisoned",
                "Task poisoned; rejecting calls until restart",
                &self.task_id,
                None,
            );
        }
        self.fail_all(state, "task poisoned by worker crash", effects);
    }

    fn fail_all(&self, state: &mut QueueState, message: &str, effects: &mut Vec<Effect>) {
        let seats = state
            .waiting
            .drain(..)
            .chain(state.pending.drain(..))
            .chain(state.in_flight.drain(..))
            .collect::<Vec<_>>();
        for seat in seats {
            self.settle(
                seat,
                Outcome::Rejected(ErrorEnvelope::task_failed(message)),
                None,
                effects,
            );
        }
        self.idle_notify.notify_waiters();
    }

    fn settle(
        &self,
        seat: CallSeat,
        outcome: Outcome,
        phase: Option<CallPhase>,
        effects: &mut Vec<Effect>,
    ) {
        let call_id = seat.descriptor.call_id;
        let method = seat.descriptor.method.clone();
        let key = seat.descriptor.key.clone();
        let (reply, span_started) = seat.finish();
        let duration_ms = span_started
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

        let (kind, result): (EventKind, Result<Payload>) = match outcome {
            Outcome::Fulfilled(value) => {
                self.counters.inc_settled();
                (EventKind::Settle, Ok(value))
            },
            Outcome::Canceled(error) => {
                self.counters.inc_canceled();
                (EventKind::Cancel, Err(error))
            },
            Outcome::Rejected(error) => {
                self.counters.inc_rejected();
                (EventKind::Reject, Err(error))
            },
            Outcome::Dropped(error) => {
                self.counters.inc_dropped();
                (EventKind::Drop, Err(error))
            },
        };

        if self.observer.active() {
            let mut event = RuntimeEvent::new(kind, self.task_id.clone())
                .with_call(call_id, method)
                .with_key(key);
            if let Some(phase) = phase {
                event = event.with_phase(phase);
            }
            if let Err(error) = &result {
                event = event.with_error(error.clone());
            }
            if let Some(duration_ms) = duration_ms {
                event = event.with_duration_ms(duration_ms);
            }
            effects.push(Effect::Event(event));
        }
        effects.push(Effect::Reply { reply, result });
        effects.push(Effect::Settled(call_id));
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// A call's composite abort fired.
    pub fn on_abort(self: &Arc<Self>, call_id: CallId, cause: &AbortCause) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();

            if let Some(index) = state
                .waiting
                .iter()
                .position(|seat| seat.descriptor.call_id == call_id)
            {
                if let Some(seat) = state.waiting.remove(index) {
                    self.settle(
                        seat,
                        Outcome::Canceled(abort_envelope(cause)),
                        Some(CallPhase::Waiting),
                        &mut effects,
                    );
                }
            } else if let Some(index) = state
                .pending
                .iter()
                .position(|seat| seat.descriptor.call_id == call_id)
            {
                if let Some(seat) = state.pending.remove(index) {
                    self.settle(
                        seat,
                        Outcome::Canceled(abort_envelope(cause)),
                        Some(CallPhase::Pending),
                        &mut effects,
                    );
                }
                self.rebalance(&mut state, &mut effects);
            } else if let Some(seat) = state
                .in_flight
                .iter_mut()
                .find(|seat| seat.descriptor.call_id == call_id)
            {
                if !seat.cancel_requested {
                    seat.cancel_requested = true;
                    effects.push(Effect::CancelForward(call_id));
                    if self.observer.active() {
                        effects.push(Effect::Event(
                            RuntimeEvent::new(EventKind::Cancel, self.task_id.clone())
                                .with_call(call_id, seat.descriptor.method.clone())
                                .with_key(seat.descriptor.key.clone())
                                .with_phase(CallPhase::InFlight),
                        ));
                    }
                    let grace = Duration::from_millis(self.config.cancel_grace_ms);
                    let weak = Arc::downgrade(self);
                    seat.grace = Some(tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        if let Some(core) = weak.upgrade() {
                            core.on_grace_expired(call_id);
                        }
                    }));
                }
            }
        }
        self.run_effects(effects);
    }

    /// The cooperative-cancel grace window expired; the worker never settled
    /// the call, so the call settles here and the worker is put down.
    fn on_grace_expired(self: &Arc<Self>, call_id: CallId) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            let Some(index) = state
                .in_flight
                .iter()
                .position(|seat| seat.descriptor.call_id == call_id && seat.cancel_requested)
            else {
                return;
            };
            let seat = state.in_flight.remove(index);
            let envelope = seat
                .abort
                .cause()
                .map_or_else(
                    || ErrorEnvelope::abort("cancel grace window expired"),
                    |cause| abort_envelope(&cause),
                );
            // Escalation must resolve the worker assignment before the
            // settlement effect clears it.
            effects.push(Effect::Escalate(call_id));
            self.settle(
                seat,
                Outcome::Canceled(envelope),
                Some(CallPhase::InFlight),
                &mut effects,
            );
            if state.in_flight.is_empty() {
                self.idle_notify.notify_waiters();
            }
            self.rebalance(&mut state, &mut effects);
        }
        self.run_effects(effects);
    }

    // ------------------------------------------------------------------
    // Worker lifecycle plumbing (called by supervisors)
    // ------------------------------------------------------------------

    pub fn on_worker_crash(self: &Arc<Self>, slot: usize, worker_id: WorkerId, message: &str) {
        self.executor.on_worker_crash(slot);
        self.counters.inc_worker_crashes();
        if self.observer.active() {
            self.observer.emit(
                &RuntimeEvent::new(EventKind::WorkerCrash, self.task_id.clone())
                    .with_worker(worker_id)
                    .with_error(ErrorEnvelope::worker_crashed(message)),
            );
        }
        if self.config.crash_policy == CrashPolicy::FailTask {
            let mut effects = Vec::new();
            {
                let mut state = self.lock_state();
                self.poison(&mut state, &mut effects);
            }
            self.run_effects(effects);
        }
    }

    pub fn note_worker_started(&self, worker_id: WorkerId) {
        if self.observer.active() {
            self.observer.emit(
                &RuntimeEvent::new(EventKind::WorkerStart, self.task_id.clone())
                    .with_worker(worker_id),
            );
        }
    }

    pub fn note_worker_stopped(&self, worker_id: Option<WorkerId>, _reason: &'static str) {
        if self.observer.active() {
            let mut event = RuntimeEvent::new(EventKind::WorkerStop, self.task_id.clone());
            if let Some(worker_id) = worker_id {
                event = event.with_worker(worker_id);
            }
            self.observer.emit(&event);
        }
    }

    /// True when nothing is queued or waiting; supervisors consult this
    /// before an idle stop.
    pub fn queues_idle(&self) -> bool {
        let state = self.lock_state();
        state.pending.is_empty() && state.waiting.is_empty()
    }

    // ------------------------------------------------------------------
    // Lifecycle controls
    // ------------------------------------------------------------------

    pub fn start_workers(&self) {
        self.executor.start_workers();
    }

    /// Drain in-flight cooperatively, then terminate workers. Pending and
    /// waiting calls stay queued and resume on the next dispatch.
    pub async fn stop_workers(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            state.draining = true;
        }
        loop {
            let notified = self.idle_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock_state().in_flight.is_empty() {
                break;
            }
            notified.await;
        }
        self.executor.stop_workers().await;
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            state.draining = false;
            self.rebalance(&mut state, &mut effects);
        }
        self.run_effects(effects);
    }

    /// Idempotent teardown: fail everything, terminate workers.
    pub async fn dispose(self: &Arc<Self>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if state.lifecycle == TaskLifecycle::Disposed {
                return;
            }
            state.lifecycle = TaskLifecycle::Disposed;
            self.fail_all(&mut state, "task disposed", &mut effects);
        }
        self.run_effects(effects);
        self.executor.shutdown().await;
    }

    /// Clear poisoning after a fail-task crash; workers boot lazily again.
    pub fn restart(self: &Arc<Self>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if state.lifecycle == TaskLifecycle::Poisoned {
                state.lifecycle = TaskLifecycle::Active;
                self.rebalance(&mut state, &mut effects);
            }
        }
        self.run_effects(effects);
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> TaskSnapshot {
        let workers: Vec<WorkerSnapshot> = self.executor.worker_snapshots();
        let active_workers = workers
            .iter()
            .filter(|worker| worker.state.is_active())
            .count();
        let state = self.lock_state();
        TaskSnapshot {
            task_id: self.task_id.clone(),
            task_name: self.config.task_name.as_deref().map(Box::from),
            kind: self.config.kind,
            init: self.config.init,
            pool_size: self.config.pool_size,
            lifecycle: state.lifecycle,
            workers,
            active_workers,
            in_flight_depth: state.in_flight.len(),
            pending_depth: state.pending.len(),
            waiting_depth: state.waiting.len(),
            max_in_flight: self.config.effective_max_in_flight(),
            max_pending: self.config.max_pending,
            max_waiting: self.config.max_waiting,
            queue_policy: Box::from(self.config.queue_policy.name()),
            crash_policy: Box::from(self.config.crash_policy.name()),
            counters: self.counters.snapshot(),
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn run_effects(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Event(event) => self.observer.emit(&event),
                Effect::Reply { reply, result } => {
                    let _ = reply.send(result);
                },
                Effect::Dispatch(dispatch) => self.executor.dispatch(dispatch),
                Effect::CancelForward(call_id) => self.executor.cancel(call_id),
                Effect::Escalate(call_id) => self.executor.escalate(call_id),
                Effect::Settled(call_id) => self.executor.note_settled(call_id),
            }
        }
    }

    /// Build a seat and spawn its abort watcher. Called by the task handle.
    pub fn seat(
        self: &Arc<Self>,
        descriptor: CallDescriptor,
        reply: ReplySender,
        abort: AbortSignal,
        guard: CompositeGuard,
        deadline: Option<DeadlineHandle>,
    ) -> CallSeat {
        let call_id = descriptor.call_id;
        let watcher = {
            let signal = abort.clone();
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                let cause = signal.aborted().await;
                if let Some(core) = weak.upgrade() {
                    core.on_abort(call_id, &cause);
                }
            })
        };
        CallSeat {
            descriptor,
            reply,
            abort,
            _guard: guard,
            _deadline: deadline,
            watcher: Some(watcher),
            grace: None,
            attempts: 0,
            cancel_requested: false,
            span_started: None,
        }
    }
}

impl std::fmt::Debug for TaskCore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        formatter
            .debug_struct("TaskCore")
            .field("taskId", &self.task_id)
            .field("lifecycle", &state.lifecycle)
            .field("waiting", &state.waiting.len())
            .field("pending", &state.pending.len())
            .field("inFlight", &state.in_flight.len())
            .finish()
    }
}

/// Map an abort cause to the taxonomy: timeouts keep their own code, every
/// other first cause is a plain abort.
fn abort_envelope(cause: &AbortCause) -> ErrorEnvelope {
    let message = cause
        .message
        .as_deref()
        .unwrap_or("call aborted")
        .to_string();
    match cause.reason {
        AbortReason::Timeout => ErrorEnvelope::timeout(message),
        AbortReason::External | AbortReason::Key | AbortReason::Fault => {
            ErrorEnvelope::abort(message).with_metadata("reason", cause.reason.to_string())
        },
    }
}
