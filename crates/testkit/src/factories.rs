//! Worker factory wrappers for exercising supervisor behavior.

use offload_ports::{BoxFuture, WorkerFactory, WorkerPort};
use offload_shared::{ErrorCode, ErrorEnvelope, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps a factory and fails the first `failures` boots before delegating.
/// Exercises lazy boot retry and boot-failure surfacing.
pub struct FlakyBootFactory {
    inner: Arc<dyn WorkerFactory>,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyBootFactory {
    /// Fail the first `failures` create calls, then delegate to `inner`.
    pub fn new(inner: Arc<dyn WorkerFactory>, failures: usize) -> Self {
        Self {
            inner,
            failures_remaining: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Boot attempts observed so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl WorkerFactory for FlakyBootFactory {
    fn create(&self) -> BoxFuture<'static, Result<Arc<dyn WorkerPort>>> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let fail = self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if fail {
            return Box::pin(async {
                Err(ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    "scripted boot failure",
                    offload_shared::ErrorClass::Retriable,
                ))
            });
        }
        self.inner.create()
    }
}

/// Wraps a factory and counts successful delegations. Exercises restart and
/// idle-stop behavior (scenario: one factory, many boots).
pub struct CountingFactory {
    inner: Arc<dyn WorkerFactory>,
    created: Arc<AtomicUsize>,
}

impl CountingFactory {
    /// Count create calls delegated to `inner`.
    pub fn new(inner: Arc<dyn WorkerFactory>) -> Self {
        Self {
            inner,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Shareable view of the counter.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.created)
    }
}

impl WorkerFactory for CountingFactory {
    fn create(&self) -> BoxFuture<'static, Result<Arc<dyn WorkerPort>>> {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.inner.create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverFactory;

    impl WorkerFactory for NeverFactory {
        fn create(&self) -> BoxFuture<'static, Result<Arc<dyn WorkerPort>>> {
            Box::pin(async {
                Err(ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    "inner factory unavailable",
                    offload_shared::ErrorClass::NonRetriable,
                ))
            })
        }
    }

    #[tokio::test]
    async fn flaky_factory_fails_then_delegates() {
        let flaky = FlakyBootFactory::new(Arc::new(NeverFactory), 2);

        let first = flaky.create().await;
        let second = flaky.create().await;
        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(flaky.attempts(), 2);

        // Third call reaches the (also failing) inner factory.
        let third = flaky.create().await.err().expect("inner factory fails too");
        assert_eq!(third.message, "inner factory unavailable");
        assert_eq!(flaky.attempts(), 3);
    }
}
