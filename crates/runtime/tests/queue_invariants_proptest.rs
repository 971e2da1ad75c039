//! Property checks: for arbitrary call mixes, every enqueued call settles
//! exactly once and the depth caps hold at every observation.

use offload_adapters::{HandlerMap, LocalWorkerFactory};
use offload_runtime::{
    Payload, QueuePolicy, RuntimeConfig, TaskConfig, TaskDeps, TaskRuntime,
};
use offload_shared::{AbortCause, AbortReason, AbortSource, ErrorEnvelope};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CallPlan {
    delay_ms: u64,
    cancel_after_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct TaskPlan {
    policy: QueuePolicy,
    max_in_flight: usize,
    max_pending: Option<usize>,
    calls: Vec<CallPlan>,
}

fn call_strategy() -> impl Strategy<Value = CallPlan> {
    (
        1_u64..20,
        proptest::option::weighted(0.3, 1_u64..15),
        proptest::option::weighted(0.2, 5_u64..25),
    )
        .prop_map(|(delay_ms, cancel_after_ms, timeout_ms)| CallPlan {
            delay_ms,
            cancel_after_ms,
            timeout_ms,
        })
}

fn plan_strategy() -> impl Strategy<Value = TaskPlan> {
    (
        prop_oneof![
            Just(QueuePolicy::Block),
            Just(QueuePolicy::Reject),
            Just(QueuePolicy::DropOldest),
            Just(QueuePolicy::DropLatest),
        ],
        1_usize..3,
        // Zero-cap pending under `block` parks calls forever by design;
        // that boundary has its own dedicated test.
        proptest::option::weighted(0.7, 1_usize..4),
        proptest::collection::vec(call_strategy(), 1..12),
    )
        .prop_map(|(policy, max_in_flight, max_pending, calls)| TaskPlan {
            policy,
            max_in_flight,
            max_pending,
            calls,
        })
}

fn cooperative_handlers() -> HandlerMap {
    HandlerMap::new().with("work", |args: Payload, signal| async move {
        let delay = args.as_int().unwrap_or(1).max(0) as u64;
        tokio::select! {
            _ = signal.aborted() => Err(ErrorEnvelope::abort("handler observed cancel")),
            () = tokio::time::sleep(Duration::from_millis(delay)) => Ok(args),
        }
    })
}

async fn run_plan(plan: TaskPlan) -> std::result::Result<(), TestCaseError> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())
        .map_err(|error| TestCaseError::fail(error.to_string()))?;

    let mut config = TaskConfig::singleton();
    config.max_in_flight = Some(plan.max_in_flight);
    config.max_pending = plan.max_pending;
    config.queue_policy = plan.policy;
    let task = runtime
        .define_task(
            config,
            TaskDeps::new(Arc::new(LocalWorkerFactory::new(cooperative_handlers()))),
        )
        .map_err(|error| TestCaseError::fail(error.to_string()))?;

    let total = plan.calls.len() as u64;
    let mut joins = Vec::new();
    for call in &plan.calls {
        let mut builder = task
            .call("work")
            .args(Payload::Int(i64::try_from(call.delay_ms).unwrap_or(1)));
        if let Some(timeout_ms) = call.timeout_ms {
            builder = builder.timeout_ms(timeout_ms);
        }
        let source = call.cancel_after_ms.map(|after_ms| {
            let source = AbortSource::new();
            let signal = source.signal();
            (source, after_ms, signal)
        });
        if let Some((_, _, signal)) = source.as_ref() {
            builder = builder.signal(signal.clone());
        }
        if let Some((source, after_ms, _)) = source {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(after_ms)).await;
                source.abort(AbortCause::new(AbortReason::External));
            });
        }
        joins.push(tokio::spawn(builder.dispatch()));
    }

    // Sample the queue shape mid-run; caps must hold at every observation.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(3)).await;
        let snapshot = task.snapshot();
        prop_assert!(
            snapshot.in_flight_depth <= plan.max_in_flight,
            "in-flight {} exceeds cap {}",
            snapshot.in_flight_depth,
            plan.max_in_flight
        );
        if let Some(cap) = plan.max_pending {
            prop_assert!(
                snapshot.pending_depth <= cap,
                "pending {} exceeds cap {}",
                snapshot.pending_depth,
                cap
            );
        }
    }

    // Exactly one settlement per call: each join resolves exactly once.
    let mut settlements = 0_u64;
    for join in joins {
        let _ = join.await.map_err(|error| TestCaseError::fail(error.to_string()))?;
        settlements += 1;
    }
    prop_assert_eq!(settlements, total);

    // Terminal bookkeeping: outcome counters account for every call and
    // the queues are empty.
    let snapshot = task.snapshot();
    let accounted = snapshot.counters.total_settled
        + snapshot.counters.total_rejected
        + snapshot.counters.total_canceled
        + snapshot.counters.total_dropped;
    prop_assert_eq!(accounted, total);
    prop_assert_eq!(snapshot.in_flight_depth, 0);
    prop_assert_eq!(snapshot.pending_depth, 0);
    prop_assert_eq!(snapshot.waiting_depth, 0);
    prop_assert!(snapshot.counters.total_dispatched <= total);

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 12,
        ..ProptestConfig::default()
    })]

    #[test]
    fn arbitrary_call_mixes_preserve_queue_invariants(plan in plan_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("tokio runtime");
        runtime.block_on(run_plan(plan))?;
    }
}
