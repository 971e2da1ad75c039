//! Worker transport boundary contract.
//!
//! The runtime never talks to a concrete worker implementation; it drives
//! this port. "The transport failed" (the `crashed` signal fires, pending
//! invokes resolve `worker:crashed`) is distinct from "the handler rejected
//! a call" (`task:handler`, or an abort-shaped code when the handler observed
//! its cancel signal); only the former is a crash.

use crate::BoxFuture;
use offload_domain::{Payload, TransferList};
use offload_shared::{AbortSignal, CallId, Result, WorkerId};
use std::sync::Arc;

/// One call handed across the worker boundary.
#[derive(Debug)]
pub struct InvokeRequest {
    /// Call identity, echoed back by cancels.
    pub call_id: CallId,
    /// Handler method name.
    pub method: Box<str>,
    /// Handler arguments (buffers already detached under `keep` mode).
    pub args: Payload,
    /// The argument handoff set computed by the extractor.
    pub transferables: TransferList,
}

/// Boundary contract for one live worker instance.
pub trait WorkerPort: Send + Sync {
    /// The instance id assigned at boot.
    fn worker_id(&self) -> WorkerId;

    /// Dispatch one call. The future resolves when the handler settles the
    /// call; it rejects with `worker:crashed` when the transport dies first.
    fn invoke(&self, request: InvokeRequest) -> BoxFuture<'static, Result<Payload>>;

    /// Request cooperative cancellation of an in-flight call. The handler
    /// observes its abort signal at its next checkpoint; non-cooperative
    /// handlers are the supervisor's problem, not the port's.
    fn cancel(&self, call_id: CallId);

    /// Tear the worker down. In-flight invokes reject with `worker:crashed`.
    fn terminate(&self) -> BoxFuture<'static, ()>;

    /// One-shot signal that fires when the transport fails out-of-band
    /// (channel closed, handler panic at worker level).
    fn crashed(&self) -> AbortSignal;
}

/// Factory producing worker instances for one task.
pub trait WorkerFactory: Send + Sync {
    /// Boot a fresh worker. Boot failures are surfaced as envelopes; lazy
    /// tasks retry once on the next dispatch before giving up.
    fn create(&self) -> BoxFuture<'static, Result<Arc<dyn WorkerPort>>>;
}
