//! Abort sources, composite signals, and the keyed abort registry.
//!
//! An [`AbortSource`] is the single writer for a group of cheap, clonable
//! [`AbortSignal`]s. Composite signals attach to their upstreams as one-shot
//! observers that detach on first fire or when their guard is dropped, so
//! chains of (external + key + timeout) signals never form listener cycles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Why an abort fired. The first cause wins; later causes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A caller-provided signal fired.
    External,
    /// The key's registry source fired.
    Key,
    /// The call's deadline expired.
    Timeout,
    /// A worker-level fault notification (transport failure, handler panic).
    Fault,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => formatter.write_str("external"),
            Self::Key => formatter.write_str("key"),
            Self::Timeout => formatter.write_str("timeout"),
            Self::Fault => formatter.write_str("fault"),
        }
    }
}

/// The recorded first cause of an abort.
#[derive(Debug, Clone)]
pub struct AbortCause {
    /// Which input fired first.
    pub reason: AbortReason,
    /// Optional human-readable context supplied by the aborter.
    pub message: Option<Box<str>>,
}

impl AbortCause {
    /// Build a cause without a message.
    #[must_use]
    pub const fn new(reason: AbortReason) -> Self {
        Self {
            reason,
            message: None,
        }
    }

    /// Build a cause with a message.
    pub fn with_message(reason: AbortReason, message: impl Into<Box<str>>) -> Self {
        Self {
            reason,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug)]
struct AbortState {
    fired: AtomicBool,
    cause: Mutex<Option<AbortCause>>,
    notify: Notify,
}

impl AbortState {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            cause: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn fire(&self, cause: AbortCause) -> bool {
        {
            let mut guard = self.cause.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_some() {
                return false;
            }
            *guard = Some(cause);
        }
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        true
    }

    fn cause(&self) -> Option<AbortCause> {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Single-writer abort source. Mints shared signals.
#[derive(Debug)]
pub struct AbortSource {
    state: Arc<AbortState>,
}

impl AbortSource {
    /// Create a new, unfired source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AbortState::new()),
        }
    }

    /// Mint a signal observing this source.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            state: Arc::clone(&self.state),
        }
    }

    /// Fire the source. Returns false when it already fired (first cause wins).
    pub fn abort(&self, cause: AbortCause) -> bool {
        self.state.fire(cause)
    }

    /// Returns true once the source has fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }
}

impl Default for AbortSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A clonable, awaitable abort observer.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self {
            state: Arc::new(AbortState::new()),
        }
    }

    /// Returns true once the underlying source has fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }

    /// Returns the recorded first cause, if fired.
    #[must_use]
    pub fn cause(&self) -> Option<AbortCause> {
        self.state.cause()
    }

    /// Wait until the source fires, returning the first cause.
    pub async fn aborted(&self) -> AbortCause {
        loop {
            if let Some(cause) = self.checked_cause() {
                return cause;
            }
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking, or a fire landing between the
            // check and the first poll would be missed.
            notified.as_mut().enable();
            if let Some(cause) = self.checked_cause() {
                return cause;
            }
            notified.await;
        }
    }

    fn checked_cause(&self) -> Option<AbortCause> {
        if self.is_aborted() {
            // Fired flag is set after the cause is recorded, so this is Some.
            self.cause()
        } else {
            None
        }
    }

    /// Compose several upstream signals into one that fires on the first
    /// upstream cause. The watchers detach when the returned guard drops.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn composite(upstreams: &[Self]) -> (Self, CompositeGuard) {
        let source = AbortSource::new();
        let signal = source.signal();
        let source = Arc::new(source);
        let mut watchers = Vec::with_capacity(upstreams.len());

        for upstream in upstreams {
            if let Some(cause) = upstream.cause() {
                source.abort(cause);
                break;
            }
            let upstream = upstream.clone();
            let source = Arc::clone(&source);
            watchers.push(tokio::spawn(async move {
                let cause = upstream.aborted().await;
                source.abort(cause);
            }));
        }

        (signal, CompositeGuard { watchers })
    }
}

/// Detaches a composite signal's upstream observers when dropped.
#[derive(Debug)]
pub struct CompositeGuard {
    watchers: Vec<JoinHandle<()>>,
}

impl CompositeGuard {
    /// A guard with nothing to detach.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            watchers: Vec::new(),
        }
    }
}

impl Drop for CompositeGuard {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

struct KeyEntry {
    source: AbortSource,
    links: Vec<JoinHandle<()>>,
}

impl KeyEntry {
    fn new() -> Self {
        Self {
            source: AbortSource::new(),
            links: Vec::new(),
        }
    }

    fn detach_links(&mut self) {
        for link in self.links.drain(..) {
            link.abort();
        }
    }
}

/// Keyed cancellation controller shared across tasks.
///
/// A key maps to at most one source at a time. Operations on unknown keys
/// never error: `abort`/`clear` are no-ops, `signal_for` creates the entry.
pub struct AbortRegistry {
    entries: Mutex<HashMap<Box<str>, KeyEntry>>,
}

impl AbortRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return a signal tied to `key`, creating the source if absent.
    #[must_use]
    pub fn signal_for(&self, key: &str) -> AbortSignal {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(Box::from(key))
            .or_insert_with(KeyEntry::new)
            .source
            .signal()
    }

    /// Fire the source stored for `key`. Unknown key: no-op. Repeat aborts on
    /// the same key are no-ops after the first.
    pub fn abort(&self, key: &str, message: Option<&str>) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(key) {
            let cause = message.map_or_else(
                || AbortCause::new(AbortReason::Key),
                |message| AbortCause::with_message(AbortReason::Key, message),
            );
            entry.source.abort(cause);
        }
    }

    /// Discard the source for `key` without aborting. Signals minted earlier
    /// keep their state; a later `signal_for` mints against a fresh source.
    pub fn clear(&self, key: &str) {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.remove(key)
        };
        if let Some(mut entry) = removed {
            entry.detach_links();
        }
    }

    /// Merge an externally provided signal into `key`: when either fires, the
    /// key's signals observe an abort. The link detaches on `clear`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn link_external(&self, key: &str, external: &AbortSignal) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(Box::from(key)).or_insert_with(KeyEntry::new);

        if let Some(cause) = external.cause() {
            entry.source.abort(cause);
            return;
        }

        let external = external.clone();
        let source_signal = entry.source.signal();
        let source = AbortSource {
            state: Arc::clone(&source_signal.state),
        };
        entry.links.push(tokio::spawn(async move {
            let cause = external.aborted().await;
            source.abort(cause);
        }));
    }
}

impl Default for AbortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AbortRegistry {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values_mut() {
            entry.detach_links();
        }
    }
}

impl fmt::Debug for AbortRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        formatter
            .debug_struct("AbortRegistry")
            .field("keys", &entries.len())
            .finish()
    }
}
