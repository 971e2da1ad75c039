//! Pure-data snapshots of runtime and per-task state.

use crate::config::{InitMode, TaskKind};
use crate::states::{TaskLifecycle, WorkerState};
use offload_shared::{TaskId, WorkerId};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Queue counters accumulated over a task's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounters {
    /// Calls handed to a worker.
    pub total_dispatched: u64,
    /// Calls fulfilled.
    pub total_settled: u64,
    /// Calls rejected with any taxonomy error.
    pub total_rejected: u64,
    /// Calls cancelled before or during execution.
    pub total_canceled: u64,
    /// Calls evicted by a drop policy.
    pub total_dropped: u64,
    /// Crash requeues performed.
    pub total_requeued: u64,
    /// Worker transport failures observed.
    pub worker_crash_total: u64,
}

/// Point-in-time view of one worker slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    /// Instance id of the live worker, absent while stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Calls currently riding this worker.
    pub in_flight: usize,
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Task id.
    pub task_id: TaskId,
    /// Display name, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<Box<str>>,
    /// Executor shape.
    pub kind: TaskKind,
    /// Worker boot mode.
    pub init: InitMode,
    /// Configured worker count.
    pub pool_size: usize,
    /// Task lifecycle state.
    pub lifecycle: TaskLifecycle,
    /// Per-worker view; the in-flight histogram for pools.
    pub workers: Vec<WorkerSnapshot>,
    /// Workers currently starting or running.
    pub active_workers: usize,
    /// Calls dispatched and unsettled.
    pub in_flight_depth: usize,
    /// Calls admitted and undispatched.
    pub pending_depth: usize,
    /// Calls parked by the block policy.
    pub waiting_depth: usize,
    /// In-flight cap.
    pub max_in_flight: usize,
    /// Pending depth cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
    /// Waiting depth cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_waiting: Option<usize>,
    /// Queue policy label.
    pub queue_policy: Box<str>,
    /// Crash policy label.
    pub crash_policy: Box<str>,
    /// Lifetime counters.
    pub counters: QueueCounters,
}

impl TaskSnapshot {
    /// Cheap structural digest over counters, depths, and worker states.
    ///
    /// Two snapshots with equal digests are treated as unchanged by
    /// `only_on_change` subscriptions.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.task_id.as_str().hash(&mut hasher);
        self.lifecycle.accepts_calls().hash(&mut hasher);
        self.counters.total_dispatched.hash(&mut hasher);
        self.counters.total_settled.hash(&mut hasher);
        self.counters.total_rejected.hash(&mut hasher);
        self.counters.total_canceled.hash(&mut hasher);
        self.counters.total_dropped.hash(&mut hasher);
        self.counters.total_requeued.hash(&mut hasher);
        self.counters.worker_crash_total.hash(&mut hasher);
        self.in_flight_depth.hash(&mut hasher);
        self.pending_depth.hash(&mut hasher);
        self.waiting_depth.hash(&mut hasher);
        for worker in &self.workers {
            worker.state.name().hash(&mut hasher);
            worker.in_flight.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Point-in-time view of the whole runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    /// Wall-clock milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Per-task views, ordered by task id.
    pub tasks: Vec<TaskSnapshot>,
}

impl RuntimeSnapshot {
    /// Assemble a runtime snapshot, ordering tasks by id.
    #[must_use]
    pub fn new(mut tasks: Vec<TaskSnapshot>) -> Self {
        tasks.sort_by(|left, right| left.task_id.cmp(&right.task_id));
        Self {
            timestamp_ms: now_epoch_ms(),
            tasks,
        }
    }

    /// Combined digest across all tasks (timestamp excluded).
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for task in &self.tasks {
            task.digest().hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(task_id: &str) -> TaskSnapshot {
        TaskSnapshot {
            task_id: TaskId::parse(task_id).expect("valid id"),
            task_name: None,
            kind: TaskKind::Singleton,
            init: InitMode::Lazy,
            pool_size: 1,
            lifecycle: TaskLifecycle::Active,
            workers: vec![WorkerSnapshot {
                worker_id: None,
                state: WorkerState::Stopped,
                in_flight: 0,
            }],
            active_workers: 0,
            in_flight_depth: 0,
            pending_depth: 0,
            waiting_depth: 0,
            max_in_flight: 1,
            max_pending: Some(2),
            max_waiting: None,
            queue_policy: "block".into(),
            crash_policy: "restart-fail-in-flight".into(),
            counters: QueueCounters::default(),
        }
    }

    #[test]
    fn digest_is_stable_for_equal_state() {
        let first = sample_task("alpha");
        let second = sample_task("alpha");
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn digest_changes_with_counters_and_depths() {
        let base = sample_task("alpha");

        let mut counted = base.clone();
        counted.counters.total_settled = 1;
        assert_ne!(base.digest(), counted.digest());

        let mut queued = base.clone();
        queued.pending_depth = 1;
        assert_ne!(base.digest(), queued.digest());
    }

    #[test]
    fn runtime_snapshot_orders_tasks_by_id() {
        let snapshot = RuntimeSnapshot::new(vec![sample_task("zeta"), sample_task("alpha")]);
        let ids: Vec<&str> = snapshot
            .tasks
            .iter()
            .map(|task| task.task_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn snapshot_serializes_camel_case() -> Result<(), serde_json::Error> {
        let snapshot = sample_task("alpha");
        let value = serde_json::to_value(&snapshot)?;
        assert_eq!(value["queuePolicy"], "block");
        assert_eq!(value["counters"]["totalDispatched"], 0);
        assert_eq!(value["workers"][0]["state"], "stopped");
        Ok(())
    }
}
