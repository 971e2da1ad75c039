//! Worker and task state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No live worker; next dispatch boots one.
    Stopped,
    /// Factory creation in progress.
    Starting,
    /// Port ready; accepting dispatches.
    Running,
    /// Transport failed; in-flight cleanup in progress.
    Crashing,
    /// Explicitly terminated (task disposal).
    Terminated,
}

impl WorkerState {
    /// True while the worker can accept or is preparing to accept dispatches.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Stable label for snapshots and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Crashing => "crashing",
            Self::Terminated => "terminated",
        }
    }
}

/// Lifecycle state of a task as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLifecycle {
    /// Accepting dispatches.
    Active,
    /// Poisoned by the fail-task crash policy; enqueues reject until restart.
    Poisoned,
    /// Disposed; removed from the runtime registry.
    Disposed,
}

impl TaskLifecycle {
    /// True when enqueues are accepted.
    #[must_use]
    pub const fn accepts_calls(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states_accept_dispatch() {
        assert!(WorkerState::Running.is_active());
        assert!(WorkerState::Starting.is_active());
        assert!(!WorkerState::Stopped.is_active());
        assert!(!WorkerState::Crashing.is_active());
    }

    #[test]
    fn only_active_tasks_accept_calls() {
        assert!(TaskLifecycle::Active.accepts_calls());
        assert!(!TaskLifecycle::Poisoned.accepts_calls());
        assert!(!TaskLifecycle::Disposed.accepts_calls());
    }

    #[test]
    fn worker_state_serializes_snake_case() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(WorkerState::Crashing)?;
        assert_eq!(value, serde_json::json!("crashing"));
        Ok(())
    }
}
