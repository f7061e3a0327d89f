//! Integration tests for hook sources and phase execution.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lodestar_hooks::prelude::*;

static STARTUP_RUNS: AtomicUsize = AtomicUsize::new(0);
static SHUTDOWN_RUNS: AtomicUsize = AtomicUsize::new(0);

fn lifecycle_hooks() -> Result<Vec<HookDefinition>, HookError> {
    Ok(vec![
        HookDefinition::new::<AfterStartup, _>("count-startup", |_ctx| {
            Box::pin(async {
                STARTUP_RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
        HookDefinition::new::<BeforeShutdown, _>("count-shutdown", |_ctx| {
            Box::pin(async {
                SHUTDOWN_RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
        HookDefinition::new::<AfterStartup, _>("reject-startup", |ctx| {
            Box::pin(async move {
                Err(HookError::failed(
                    "reject-startup",
                    format!("rejected in {}", ctx.phase()),
                ))
            })
        }),
    ])
}

static LIFECYCLE: StaticHookSource = StaticHookSource::new("lifecycle", lifecycle_hooks);

#[tokio::test]
async fn source_hooks_run_once_per_phase_and_failures_are_isolated() {
    let registry = HookRegistry::new();
    let correlation_id = CorrelationId::new("integration");

    let results = registry.register_hooks(&LIFECYCLE, &correlation_id);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));

    let outcome = registry.execute::<AfterStartup>(correlation_id.clone()).await;
    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.failed(), 1);
    assert_eq!(STARTUP_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(SHUTDOWN_RUNS.load(Ordering::SeqCst), 0);

    let (name, err) = outcome.failures().next().expect("one failure");
    assert_eq!(name, "reject-startup");
    assert!(err.to_string().contains("AFTER_STARTUP"));

    let outcome = registry.execute::<BeforeShutdown>(correlation_id).await;
    assert!(outcome.is_success());
    assert_eq!(STARTUP_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(SHUTDOWN_RUNS.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn registering_a_source_twice_reports_duplicates() {
    let registry = HookRegistry::new();
    let correlation_id = CorrelationId::new("dup");

    registry.register_hooks(&LIFECYCLE, &correlation_id);
    let again = registry.register_hooks(&LIFECYCLE, &correlation_id);

    assert!(again
        .iter()
        .all(|r| matches!(r, Err(HookRegistrationError::DuplicateName { .. }))));
    assert_eq!(registry.hook_count(PhaseId::of::<AfterStartup>()), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hooks_of_a_phase_run_concurrently() {
    let registry = Arc::new(HookRegistry::new());
    let correlation_id = CorrelationId::new("concurrent");
    let barrier = Arc::new(tokio::sync::Barrier::new(3));

    for name in ["a", "b", "c"] {
        let barrier = Arc::clone(&barrier);
        registry
            .register::<BeforeBootstrap, _>(name, &correlation_id, move |_ctx| {
                let barrier = Arc::clone(&barrier);
                Box::pin(async move {
                    // completes only if all three hooks are in flight together
                    barrier.wait().await;
                    Ok(())
                })
            })
            .expect("registration should succeed");
    }

    let outcome = tokio::time::timeout(
        core::time::Duration::from_secs(5),
        registry.execute::<BeforeBootstrap>(correlation_id),
    )
    .await
    .expect("hooks should not deadlock");
    assert_eq!(outcome.succeeded(), 3);
}

#[tokio::test]
async fn hooks_receive_the_payload() {
    let registry = HookRegistry::new();
    let correlation_id = CorrelationId::new("payload");
    let seen = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&seen);
    registry
        .register::<OncePerRequest, _>("read-payload", &correlation_id, move |ctx| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                let value = ctx
                    .payload::<usize>()
                    .ok_or_else(|| HookError::failed("read-payload", "missing payload"))?;
                sink.store(*value, Ordering::SeqCst);
                Ok(())
            })
        })
        .expect("registration should succeed");

    let context = HookContext::of::<OncePerRequest>(correlation_id).with_payload(Arc::new(7_usize));
    let outcome = registry.execute_hooks(context).await;

    assert!(outcome.is_success());
    assert_eq!(seen.load(Ordering::SeqCst), 7);
}
