//! In-process worker adapter.
//!
//! Each worker instance is a dedicated Tokio task owning a command channel:
//! the in-process stand-in for a background execution context. Handlers run
//! as subtasks of the worker so one slow call never blocks the channel, and
//! a handler panic takes the whole worker down, which is the crash the
//! supervisor recovers from, as opposed to a handler returning an error,
//! which settles only its own call.

use crate::channel_down;
use offload_domain::Payload;
use offload_ports::{BoxFuture, InvokeRequest, WorkerFactory, WorkerPort};
use offload_shared::{
    AbortCause, AbortReason, AbortSignal, AbortSource, CallId, ErrorEnvelope, Result, WorkerId,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Boxed future returned by registered handlers.
pub type HandlerFuture = BoxFuture<'static, Result<Payload>>;

type Handler = Arc<dyn Fn(Payload, AbortSignal) -> HandlerFuture + Send + Sync>;

/// Method-name to handler registry executed by local workers.
///
/// Handlers receive their arguments and a per-call abort signal; cooperative
/// handlers check the signal at their checkpoints and return an abort-shaped
/// error when it fired.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: BTreeMap<Box<str>, Handler>,
}

impl HandlerMap {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `method`, replacing any previous registration.
    #[must_use]
    pub fn with<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Payload, AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |args, signal| Box::pin(handler(args, signal)));
        self.handlers.insert(Box::from(method), boxed);
        self
    }

    /// Registered method names, in order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(AsRef::as_ref)
    }

    fn get(&self, method: &str) -> Option<Handler> {
        self.handlers.get(method).cloned()
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandlerMap")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Factory spawning in-process workers over a shared handler registry.
#[derive(Debug, Clone)]
pub struct LocalWorkerFactory {
    handlers: Arc<HandlerMap>,
}

impl LocalWorkerFactory {
    /// Create a factory for the given handler registry.
    #[must_use]
    pub fn new(handlers: HandlerMap) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }
}

impl WorkerFactory for LocalWorkerFactory {
    fn create(&self) -> BoxFuture<'static, Result<Arc<dyn WorkerPort>>> {
        let handlers = Arc::clone(&self.handlers);
        Box::pin(async move {
            let worker_id = WorkerId::generate();
            let crash = AbortSource::new();
            let crash_signal = crash.signal();
            let (commands, command_rx) = mpsc::unbounded_channel();
            tokio::spawn(worker_loop(handlers, crash, command_rx));
            Ok(Arc::new(LocalWorker {
                worker_id,
                commands,
                crash: crash_signal,
            }) as Arc<dyn WorkerPort>)
        })
    }
}

enum WorkerCommand {
    Invoke {
        request: InvokeRequest,
        reply: oneshot::Sender<Result<Payload>>,
    },
    Cancel(CallId),
    Terminate {
        ack: oneshot::Sender<()>,
    },
}

/// Port handle onto one live in-process worker.
pub struct LocalWorker {
    worker_id: WorkerId,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    crash: AbortSignal,
}

impl fmt::Debug for LocalWorker {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LocalWorker")
            .field("workerId", &self.worker_id)
            .finish()
    }
}

impl WorkerPort for LocalWorker {
    fn worker_id(&self) -> WorkerId {
        self.worker_id.clone()
    }

    fn invoke(&self, request: InvokeRequest) -> BoxFuture<'static, Result<Payload>> {
        let (reply, reply_rx) = oneshot::channel();
        let sent = self
            .commands
            .send(WorkerCommand::Invoke { request, reply });
        Box::pin(async move {
            if sent.is_err() {
                return Err(channel_down());
            }
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err(channel_down()),
            }
        })
    }

    fn cancel(&self, call_id: CallId) {
        let _ = self.commands.send(WorkerCommand::Cancel(call_id));
    }

    fn terminate(&self) -> BoxFuture<'static, ()> {
        let (ack, ack_rx) = oneshot::channel();
        let sent = self.commands.send(WorkerCommand::Terminate { ack });
        Box::pin(async move {
            if sent.is_ok() {
                let _ = ack_rx.await;
            }
        })
    }

    fn crashed(&self) -> AbortSignal {
        self.crash.clone()
    }
}

async fn worker_loop(
    handlers: Arc<HandlerMap>,
    crash: AbortSource,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
) {
    let mut replies: HashMap<CallId, oneshot::Sender<Result<Payload>>> = HashMap::new();
    let mut cancels: HashMap<CallId, AbortSource> = HashMap::new();
    let mut running: JoinSet<(CallId, Result<Payload>)> = JoinSet::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WorkerCommand::Invoke { request, reply }) => {
                    let call_id = request.call_id;
                    match handlers.get(&request.method) {
                        Some(handler) => {
                            let source = AbortSource::new();
                            let signal = source.signal();
                            cancels.insert(call_id, source);
                            replies.insert(call_id, reply);
                            let future = handler(request.args, signal);
                            running.spawn(async move { (call_id, future.await) });
                        },
                        None => {
                            let error = ErrorEnvelope::handler(format!(
                                "no handler registered for method {}",
                                request.method
                            ))
                            .with_metadata("method", request.method.to_string());
                            let _ = reply.send(Err(error));
                        },
                    }
                },
                Some(WorkerCommand::Cancel(call_id)) => {
                    if let Some(source) = cancels.get(&call_id) {
                        source.abort(AbortCause::with_message(
                            AbortReason::External,
                            "cancel requested",
                        ));
                    }
                },
                Some(WorkerCommand::Terminate { ack }) => {
                    drain(&mut replies, &mut running, "worker terminated");
                    let _ = ack.send(());
                    return;
                },
                None => {
                    drain(&mut replies, &mut running, "worker channel closed");
                    return;
                },
            },
            Some(joined) = running.join_next(), if !running.is_empty() => {
                match joined {
                    Ok((call_id, result)) => {
                        cancels.remove(&call_id);
                        if let Some(reply) = replies.remove(&call_id) {
                            let _ = reply.send(result.map_err(normalize_handler_error));
                        }
                    },
                    Err(join_error) => {
                        // A handler escaped its Result: worker-level fault.
                        let message = format!("worker handler panicked: {join_error}");
                        crash.abort(AbortCause::with_message(AbortReason::Fault, &*message));
                        drain(&mut replies, &mut running, &message);
                        return;
                    },
                }
            },
        }
    }
}

fn drain(
    replies: &mut HashMap<CallId, oneshot::Sender<Result<Payload>>>,
    running: &mut JoinSet<(CallId, Result<Payload>)>,
    message: &str,
) {
    running.abort_all();
    for (_, reply) in replies.drain() {
        let _ = reply.send(Err(ErrorEnvelope::worker_crashed(message)));
    }
}

/// Abort-shaped handler errors pass through untouched; anything else is
/// wrapped so callers always see the stable `task:handler` discriminator
/// with the original message and code preserved.
fn normalize_handler_error(error: ErrorEnvelope) -> ErrorEnvelope {
    if error.is_abort_shaped() || error.code == offload_shared::ErrorCode::handler() {
        return error;
    }
    let original_code = error.code.to_string();
    ErrorEnvelope::handler(error.message).with_metadata("originalCode", original_code)
}
