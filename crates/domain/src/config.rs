//! Task configuration with validated constructors.

use offload_shared::{BoundedUsize, ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive pool size bounds for parallel tasks.
pub type PoolSize = BoundedUsize<1, 1024>;

/// Executor shape for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// One persistent worker.
    Singleton,
    /// N workers with key-affinity routing.
    Parallel,
}

impl TaskKind {
    /// Stable label for snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::Parallel => "parallel",
        }
    }
}

/// When workers boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitMode {
    /// Boot on first dispatch.
    #[default]
    Lazy,
    /// Boot at task creation.
    Eager,
}

impl InitMode {
    /// Stable label for snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lazy => "lazy",
            Self::Eager => "eager",
        }
    }
}

/// Admission discipline when the pending queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueuePolicy {
    /// Park overflow in the waiting queue (FIFO).
    #[default]
    Block,
    /// Settle overflow immediately with `task.queue_full`.
    Reject,
    /// Evict the oldest pending call, admit the new one.
    DropOldest,
    /// Settle the incoming call with `task.dropped`, keep pending intact.
    DropLatest,
}

impl QueuePolicy {
    /// Stable label for snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Reject => "reject",
            Self::DropOldest => "drop-oldest",
            Self::DropLatest => "drop-latest",
        }
    }
}

/// Recovery discipline when a worker transport fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrashPolicy {
    /// Fail in-flight calls; restart lazily on next dispatch.
    #[default]
    RestartFailInFlight,
    /// Requeue in-flight calls at the head of pending; restart immediately.
    RestartRequeueInFlight,
    /// Poison the task; fail everything until explicit restart.
    FailTask,
}

impl CrashPolicy {
    /// Stable label for snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RestartFailInFlight => "restart-fail-in-flight",
            Self::RestartRequeueInFlight => "restart-requeue-in-flight",
            Self::FailTask => "fail-task",
        }
    }
}

/// Span recording mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum SpanMode {
    /// No span recording.
    Off,
    /// Record every dispatch and trace.
    On,
    /// Record a deterministic fraction of dispatches and traces.
    Sampled {
        /// Sample rate in [0, 1].
        rate: f64,
    },
}

impl Default for SpanMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Per-task observability overrides; unset fields inherit runtime config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityOverrides {
    /// Span mode override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spans: Option<SpanMode>,
}

/// Configuration for one task.
///
/// Construct with [`TaskConfig::singleton`] / [`TaskConfig::parallel`] and
/// adjust fields; [`TaskConfig::validate`] runs at task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Explicit task id; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// Executor shape.
    pub kind: TaskKind,
    /// Worker count (parallel only; must be 1 for singleton).
    pub pool_size: usize,
    /// Worker boot mode.
    #[serde(default)]
    pub init: InitMode,
    /// Idle-stop timeout in milliseconds; absent disables idle stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// In-flight cap; defaults to 1 (singleton) or pool size (parallel).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    /// Pending queue depth cap; absent means uncapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
    /// Waiting queue depth cap (block policy); absent means uncapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_waiting: Option<usize>,
    /// Admission discipline when pending is full.
    #[serde(default)]
    pub queue_policy: QueuePolicy,
    /// Recovery discipline on worker crash.
    #[serde(default)]
    pub crash_policy: CrashPolicy,
    /// Attempt cap under requeueing crash recovery (total attempts = 1 + cap).
    pub crash_max_retries: u32,
    /// Default per-call timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// Grace window for cooperative cancels before worker termination.
    pub cancel_grace_ms: u64,
    /// Observability overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityOverrides>,
}

/// Default cancel grace window, in milliseconds.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 500;

impl TaskConfig {
    /// A singleton task with default queueing.
    #[must_use]
    pub fn singleton() -> Self {
        Self {
            task_id: None,
            task_name: None,
            kind: TaskKind::Singleton,
            pool_size: 1,
            init: InitMode::Lazy,
            idle_timeout_ms: None,
            max_in_flight: None,
            max_pending: None,
            max_waiting: None,
            queue_policy: QueuePolicy::Block,
            crash_policy: CrashPolicy::RestartFailInFlight,
            crash_max_retries: 1,
            default_timeout_ms: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            observability: None,
        }
    }

    /// A parallel task with `pool_size` workers.
    #[must_use]
    pub fn parallel(pool_size: usize) -> Self {
        Self {
            kind: TaskKind::Parallel,
            pool_size,
            ..Self::singleton()
        }
    }

    /// The effective in-flight cap.
    #[must_use]
    pub fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight.unwrap_or(match self.kind {
            TaskKind::Singleton => 1,
            TaskKind::Parallel => self.pool_size,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            TaskKind::Singleton => {
                if self.pool_size != 1 {
                    return Err(ConfigError::SingletonPoolSize {
                        pool_size: self.pool_size,
                    });
                }
            },
            TaskKind::Parallel => {
                if PoolSize::new(self.pool_size).is_none() {
                    return Err(ConfigError::PoolSizeOutOfRange {
                        pool_size: self.pool_size,
                    });
                }
            },
        }

        if let Some(ObservabilityOverrides {
            spans: Some(SpanMode::Sampled { rate }),
        }) = self.observability
        {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::SampleRateOutOfRange { rate });
            }
        }

        if self.cancel_grace_ms == 0 {
            return Err(ConfigError::ZeroCancelGrace);
        }

        Ok(())
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::singleton()
    }
}

/// Validation failures for task configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Singleton tasks have exactly one worker.
    SingletonPoolSize {
        /// Configured pool size.
        pool_size: usize,
    },
    /// Parallel pool size is outside the supported bounds.
    PoolSizeOutOfRange {
        /// Configured pool size.
        pool_size: usize,
    },
    /// Span sample rate is outside [0, 1].
    SampleRateOutOfRange {
        /// Configured rate.
        rate: f64,
    },
    /// The cancel grace window must be positive.
    ZeroCancelGrace,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingletonPoolSize { pool_size } => {
                write!(formatter, "singleton task requires poolSize=1, got {pool_size}")
            },
            Self::PoolSizeOutOfRange { pool_size } => {
                write!(formatter, "poolSize {pool_size} is outside [1, 1024]")
            },
            Self::SampleRateOutOfRange { rate } => {
                write!(formatter, "span sampleRate {rate} is outside [0, 1]")
            },
            Self::ZeroCancelGrace => formatter.write_str("cancelGraceMs must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ErrorEnvelope {
    fn from(error: ConfigError) -> Self {
        Self::expected(ErrorCode::invalid_input(), error.to_string())
    }
}
