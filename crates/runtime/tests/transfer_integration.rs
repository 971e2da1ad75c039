//! Transferable handoff semantics across the worker boundary.

use bytes::Bytes;
use offload_adapters::{HandlerMap, LocalWorkerFactory};
use offload_runtime::{
    Payload, RuntimeConfig, TaskConfig, TaskDeps, TaskRuntime, TransferMode, TransferOverride,
};
use offload_shared::Result;
use std::sync::Arc;

/// Handler reporting the address of the buffer it received, so tests can
/// tell shared storage (transfer) from copied storage (keep).
fn pointer_probe_handlers() -> HandlerMap {
    HandlerMap::new().with("probe", |args: Payload, _signal| async move {
        let pointer = args
            .as_blob()
            .map(|blob| blob.as_ptr() as usize)
            .unwrap_or_default();
        Ok(Payload::Int(i64::try_from(pointer).unwrap_or(0)))
    })
}

fn task(runtime: &TaskRuntime) -> Result<offload_runtime::TaskHandle> {
    runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(pointer_probe_handlers()))),
    )
}

#[tokio::test]
async fn transfer_mode_hands_buffers_over_zero_copy() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let task = task(&runtime)?;

    let buffer = Bytes::from_static(b"shared storage");
    let sender_pointer = buffer.as_ptr() as usize;

    let seen = task
        .call("probe")
        .args(Payload::Blob(buffer))
        .dispatch()
        .await?;
    assert_eq!(
        seen.as_int(),
        Some(i64::try_from(sender_pointer).unwrap_or(0)),
        "default transfer mode hands the same storage to the worker"
    );
    Ok(())
}

#[tokio::test]
async fn keep_mode_sends_an_independent_copy() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let task = task(&runtime)?;

    let buffer = Bytes::from(vec![7_u8; 64]);
    let sender_pointer = buffer.as_ptr() as usize;

    let seen = task
        .call("probe")
        .args(Payload::Blob(buffer))
        .transfer(TransferOverride {
            args: Some(TransferMode::Keep),
            result: None,
        })
        .dispatch()
        .await?;
    assert_ne!(
        seen.as_int(),
        Some(i64::try_from(sender_pointer).unwrap_or(0)),
        "keep mode detaches the worker's copy from the sender's storage"
    );
    Ok(())
}

#[tokio::test]
async fn result_keep_mode_copies_the_returned_buffer() -> Result<()> {
    static RESULT_STORAGE: &[u8] = b"worker-owned result";
    let handlers = HandlerMap::new().with("give", |_args: Payload, _signal| async move {
        Ok(Payload::Blob(Bytes::from_static(RESULT_STORAGE)))
    });
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;
    let task = runtime.define_task(
        TaskConfig::singleton(),
        TaskDeps::new(Arc::new(LocalWorkerFactory::new(handlers))),
    )?;

    let shared = task.call("give").dispatch().await?;
    assert_eq!(
        shared.as_blob().map(|blob| blob.as_ptr()),
        Some(RESULT_STORAGE.as_ptr()),
        "default result mode hands the worker's storage through"
    );

    let copied = task
        .call("give")
        .transfer(TransferOverride {
            args: None,
            result: Some(TransferMode::Keep),
        })
        .dispatch()
        .await?;
    assert_ne!(
        copied.as_blob().map(|blob| blob.as_ptr()),
        Some(RESULT_STORAGE.as_ptr()),
        "keep mode detaches the caller's copy from the worker's storage"
    );
    Ok(())
}

#[tokio::test]
async fn custom_extractor_overrides_the_default_walk() -> Result<()> {
    let runtime = TaskRuntime::new(RuntimeConfig::default())?;

    // A hot-path extractor that skips the payload walk entirely.
    let deps = TaskDeps::new(Arc::new(LocalWorkerFactory::new(pointer_probe_handlers())))
        .with_transferables(Arc::new(|_payload: &Payload| {
            offload_domain::TransferList::default()
        }));
    let task = runtime.define_task(TaskConfig::singleton(), deps)?;

    let seen = task
        .call("probe")
        .args(Payload::Blob(Bytes::from_static(b"unwalked")))
        .dispatch()
        .await?;
    assert!(seen.as_int().is_some());
    Ok(())
}
