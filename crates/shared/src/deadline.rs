//! Per-call deadlines expressed as abort sources.
//!
//! A deadline is just another abort input: it composes with external and
//! keyed signals, and first cause wins. Settling a call drops the handle,
//! which discards the timer before it can fire.

use crate::abort::{AbortCause, AbortReason, AbortSignal, AbortSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A running deadline timer. Dropping the handle discards the timer.
#[derive(Debug)]
pub struct DeadlineHandle {
    signal: AbortSignal,
    timer: JoinHandle<()>,
}

impl DeadlineHandle {
    /// Start a deadline that aborts with [`AbortReason::Timeout`] after
    /// `timeout`. Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(timeout: Duration) -> Self {
        let source = Arc::new(AbortSource::new());
        let signal = source.signal();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            source.abort(AbortCause::with_message(
                AbortReason::Timeout,
                format!("deadline of {} ms expired", timeout.as_millis()),
            ));
        });
        Self { signal, timer }
    }

    /// The abort signal observing this deadline.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }
}

impl Drop for DeadlineHandle {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
