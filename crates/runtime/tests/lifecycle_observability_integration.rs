//! Worker lifecycle, disposal, snapshots, events, spans, and traces.

use offload_adapters::{HandlerMap, LocalWorkerFactory};
use offload_ports::WorkerFactory;
use offload_runtime::{
    ErrorCode, ErrorEnvelope, EventKind, Payload, RuntimeConfig, SnapshotSubscriptionOptions,
    SpanMode, TaskConfig, TaskDeps, TaskRuntime,
};
use offload_shared::Result;
use offload_testkit::{CountingFactory, CountingTelemetry, EventCollector};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn echo_handlers(delay: Duration) -> HandlerMap {
    HandlerMap::new().with("work", move |args: Payload, _signal| async move {
        tokio::time::sleep(delay).await;
        Ok(args)
    })
}

#[tokio::test]
async fn idle_worker_stops_and_restarts_transparently() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let collector = EventCollector::new();
    let _events = runtime.subscribe_events(collector.listener());

    let factory = Arc::new(CountingFactory::new(Arc::new(LocalWorkerFactory::new(
        echo_handlers(Duration::from_millis(20)),
    ))));

    let mut config = TaskConfig::singleton();
    config.idle_timeout_ms = Some(100);
    let factory_dep = Arc::clone(&factory) as Arc<dyn WorkerFactory>;
    let task = runtime.define_task(config, TaskDeps::new(factory_dep))?;

    let value = task.call("work").args(Payload::text("a")).dispatch().await?;
    assert_eq!(value.as_text(), Some("a"));
    assert_eq!(factory.created(), 1);

    // Idle long enough for the supervisor to stop the worker.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let snapshot = task.snapshot();
    assert_eq!(snapshot.active_workers, 0);
    assert_eq!(collector.count(EventKind::WorkerStop), 1);

    // The next dispatch boots a fresh worker lazily.
    let value = task.call("work").args(Payload::text("b")).dispatch().await?;
    assert_eq!(value.as_text(), Some("b"));
    assert_eq!(factory.created(), 2);
    assert_eq!(collector.count(EventKind::WorkerStart), 2);
    assert_eq!(collector.count(EventKind::WorkerStop), 1);
    Ok(())
}

#[tokio::test]
async fn eager_init_boots_without_a_dispatch() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    let factory = Arc::new(CountingFactory::new(Arc::new(LocalWorkerFactory::new(
        echo_handlers(Duration::from_millis(1)),
    ))));

    let mut config = TaskConfig::singleton();
    config.init = offload_runtime::InitMode::Eager;
    let factory_dep = Arc::clone(&factory) as Arc<dyn WorkerFactory>;
    let task = runtime.define_task(config, TaskDeps::new(factory_dep))?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(factory.created(), 1);
    assert_eq!(task.snapshot().active_workers, 1);
    Ok(())
}

#[tokio::test]
async fn stop_workers_drains_in_flight_first() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(40),
        )))),
    )?;

    let call = tokio::spawn(task.call("work").args(Payload::text("drain me")).dispatch());
    tokio::time::sleep(Duration::from_millis(10)).await;

    task.stop_workers().await;
    assert_eq!(task.snapshot().active_workers, 0);

    // The in-flight call completed before termination.
    assert_eq!(call.await.expect("join")?.as_text(), Some("drain me"));
    Ok(())
}

#[tokio::test]
async fn dispose_is_idempotent_and_rejects_later_calls() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(1),
        )))),
    )?;
    let task_id = task.task_id().clone();

    task.dispose().await;
    task.dispose().await;

    let error = task
        .call("work")
        .args(Payload::Null)
        .dispatch()
        .await
        .expect_err("disposed tasks reject enqueues");
    assert_eq!(error.code, ErrorCode::task_failed());

    // Disposed tasks leave the runtime snapshot.
    let snapshot = runtime.runtime_snapshot();
    assert!(
        snapshot
            .tasks
            .iter()
            .all(|task| task.task_id != task_id)
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_task_ids_are_rejected() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let factory = Arc::new(LocalWorkerFactory::new(echo_handlers(
        Duration::from_millis(1),
    )));

    let mut config = TaskConfig::singleton();
    config.task_id = Some("thumbs".to_string());
    let _first = runtime.define_task(config.clone(), TaskDeps::new(factory.clone()))?;

    let error = runtime
        .define_task(config, TaskDeps::new(factory))
        .expect_err("duplicate id");
    assert_eq!(error.code, ErrorCode::invalid_input());
    Ok(())
}

#[tokio::test]
async fn snapshot_subscription_suppresses_unchanged_emissions() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(1),
        )))),
    )?;

    let emissions = Arc::new(AtomicUsize::new(0));
    let emissions_in_listener = Arc::clone(&emissions);
    let _subscription = runtime.subscribe_snapshot(
        SnapshotSubscriptionOptions {
            interval_ms: 15,
            emit_immediately: true,
            only_on_change: true,
        },
        move |_snapshot| {
            emissions_in_listener.fetch_add(1, Ordering::Relaxed);
        },
    );

    // Idle runtime: the immediate emission is the only one.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(emissions.load(Ordering::Relaxed), 1);

    // Activity changes the digest and re-enables emission.
    task.call("work").args(Payload::Null).dispatch().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(emissions.load(Ordering::Relaxed) >= 2);
    Ok(())
}

#[tokio::test]
async fn spans_attach_durations_to_settlement_events() -> Result<()> {
    let telemetry = Arc::new(CountingTelemetry::default());
    let runtime = TaskRuntime::new(RuntimeConfig {
        spans: SpanMode::On,
        logger: None,
        telemetry: Some(telemetry.clone()),
    })?;
    let collector = EventCollector::new();
    let _events = runtime.subscribe_events(collector.listener());

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(10),
        )))),
    )?;

    task.call("work").args(Payload::Null).dispatch().await?;

    let settles = collector.of_kind(EventKind::Settle);
    assert_eq!(settles.len(), 1);
    assert!(
        settles.first().and_then(|event| event.duration_ms).is_some(),
        "span mode `on` stamps settlement durations"
    );
    assert_eq!(telemetry.counter_total("task.dispatch.total"), 1);
    Ok(())
}

#[tokio::test]
async fn spans_off_skips_durations() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let collector = EventCollector::new();
    let _events = runtime.subscribe_events(collector.listener());

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(5),
        )))),
    )?;
    task.call("work").args(Payload::Null).dispatch().await?;

    let settles = collector.of_kind(EventKind::Settle);
    assert!(
        settles.first().and_then(|event| event.duration_ms).is_none(),
        "span mode `off` leaves settlement events unstamped"
    );
    Ok(())
}

#[tokio::test]
async fn run_with_trace_emits_status_events() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let collector = EventCollector::new();
    let _events = runtime.subscribe_events(collector.listener());

    let value = runtime
        .run_with_trace("warmup", async { Ok::<_, ErrorEnvelope>(7) })
        .await?;
    assert_eq!(value, 7);

    let failure: Result<()> = runtime
        .run_with_trace("doomed", async {
            Err(ErrorEnvelope::expected(ErrorCode::internal(), "nope"))
        })
        .await;
    assert!(failure.is_err());

    let traces = collector.of_kind(EventKind::Trace);
    let statuses: Vec<&str> = traces
        .iter()
        .filter_map(|event| event.trace_status.as_deref())
        .collect();
    assert_eq!(statuses, vec!["started", "ok", "started", "error"]);

    let ended: Vec<&str> = traces
        .iter()
        .filter(|event| event.duration_ms.is_some())
        .filter_map(|event| event.trace_name.as_deref())
        .collect();
    assert_eq!(ended, vec!["warmup", "doomed"]);
    Ok(())
}

#[tokio::test]
async fn unobserved_runtimes_skip_event_fanout() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(echo_handlers(
            Duration::from_millis(1),
        )))),
    )?;

    // No listeners, logger, or telemetry: dispatches still work and the
    // counters still move.
    task.call("work").args(Payload::Null).dispatch().await?;
    let snapshot = task.snapshot();
    assert_eq!(snapshot.counters.total_dispatched, 1);
    assert_eq!(snapshot.counters.total_settled, 1);
    Ok(())
}
