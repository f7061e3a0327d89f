//! Integration tests for bootstrapping and shutting down instances.

use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lodestar_core::bootstrap::{Bootstrap, BootstrapError, Bootstrapped};
use lodestar_core::deployable::Deployable;
use lodestar_core::discovery::{DeployableType, DiscoveryError, DiscoveryScanner, ManifestScanner};
use lodestar_core::hooks::prelude::*;
use lodestar_core::instance::Instance;
use lodestar_core::options::{Options, OptionsError};
use lodestar_core::profile::Profile;
use lodestar_core::registry::InstanceRegistry;
use lodestar_core::units::{SERVER_MAP_NAME, UnitPolicy};
use lodestar_runtime::cluster::{ClusterBind, ClusterError, ClusterManager, InMemoryCluster};
use lodestar_runtime::runtime::{ClusterOptions, Runtime, RuntimeOptions};
use lodestar_runtime::shared::AsyncMap;
use lodestar_runtime::verticle::{Verticle, VerticleContext, VerticleError, VerticleFactory};
use serde_json::{Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    before_bootstrap: AtomicUsize,
    after_startup: AtomicUsize,
    before_shutdown: AtomicUsize,
}

/// Hook source counting lifecycle phases, with an optional failing startup hook.
struct LifecycleHooks {
    counters: Arc<Counters>,
    failing_startup: bool,
}

impl HookSource for LifecycleHooks {
    fn name(&self) -> &str {
        "lifecycle"
    }

    fn hooks(&self) -> Result<Vec<HookDefinition>, HookError> {
        let bootstrap = Arc::clone(&self.counters);
        let startup = Arc::clone(&self.counters);
        let shutdown = Arc::clone(&self.counters);
        let mut hooks = vec![
            HookDefinition::new::<BeforeBootstrap, _>("count-bootstrap", move |_ctx| {
                let counters = Arc::clone(&bootstrap);
                Box::pin(async move {
                    counters.before_bootstrap.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            HookDefinition::new::<AfterStartup, _>("count-startup", move |_ctx| {
                let counters = Arc::clone(&startup);
                Box::pin(async move {
                    counters.after_startup.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            HookDefinition::new::<BeforeShutdown, _>("count-shutdown", move |ctx| {
                let counters = Arc::clone(&shutdown);
                Box::pin(async move {
                    if ctx.payload::<lodestar_core::instance::Instance>().is_none() {
                        return Err(HookError::failed("count-shutdown", "missing instance"));
                    }
                    counters.before_shutdown.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        ];
        if self.failing_startup {
            hooks.push(HookDefinition::new::<AfterStartup, _>("reject-startup", |_ctx| {
                Box::pin(async { Err(HookError::failed("reject-startup", "refused")) })
            }));
        }
        Ok(hooks)
    }
}

fn lifecycle(failing_startup: bool) -> (Arc<Counters>, Arc<dyn HookSource>) {
    let counters = Arc::new(Counters::default());
    let source: Arc<dyn HookSource> = Arc::new(LifecycleHooks {
        counters: Arc::clone(&counters),
        failing_startup,
    });
    (counters, source)
}

struct Unit {
    name: &'static str,
    starts: bool,
}

#[async_trait]
impl Verticle for Unit {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(&self, _ctx: &VerticleContext) -> Result<(), VerticleError> {
        if self.starts {
            Ok(())
        } else {
            Err(VerticleError::Start {
                verticle: self.name.to_string(),
                reason: "refused to start".to_string(),
            })
        }
    }
}

fn unit_type(name: &'static str, profile: Profile, starts: bool) -> DeployableType {
    let factory: VerticleFactory = Arc::new(
        move |_config: &Value| -> Result<Arc<dyn Verticle>, VerticleError> {
            Ok(Arc::new(Unit { name, starts }))
        },
    );
    DeployableType::new(name, profile, factory)
}

/// Hook source whose hooks come from a closure.
struct ClosureHooks<F>(F);

impl<F> HookSource for ClosureHooks<F>
where
    F: Fn() -> Vec<HookDefinition> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn hooks(&self) -> Result<Vec<HookDefinition>, HookError> {
        Ok((self.0)())
    }
}

fn hooks_from(build: impl Fn() -> Vec<HookDefinition> + Send + Sync + 'static) -> Arc<dyn HookSource> {
    Arc::new(ClosureHooks(build))
}

/// Cluster node that joins and leaves normally but cannot resolve maps.
struct MaplessNode {
    inner: Arc<dyn ClusterManager>,
}

#[async_trait]
impl ClusterManager for MaplessNode {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    async fn join(&self, bind: &ClusterBind) -> Result<(), ClusterError> {
        self.inner.join(bind).await
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        self.inner.leave().await
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn members(&self) -> Vec<String> {
        self.inner.members()
    }

    async fn async_map(&self, name: &str) -> Result<Arc<dyn AsyncMap>, ClusterError> {
        Err(ClusterError::Provider(format!("map '{name}' is unavailable")))
    }
}

fn options() -> Options {
    Options::new()
        .with_working_directory(std::env::temp_dir().join("lodestar-bootstrap-tests"))
        .with_active_profiles([Profile::CORE, Profile::STABLE])
        .with_watch_files(false)
}

fn unit_names(bootstrapped: &Bootstrapped) -> Vec<&str> {
    bootstrapped
        .deployments
        .iter()
        .map(|deployment| deployment.name())
        .collect()
}

struct BrokenScanner;

impl DiscoveryScanner for BrokenScanner {
    fn scan_for_deployables(&self) -> Result<Vec<DeployableType>, DiscoveryError> {
        Err(DiscoveryError::Scan("index unreadable".to_string()))
    }

    fn scan_for_hooks(&self) -> Result<Vec<Arc<dyn HookSource>>, DiscoveryError> {
        Ok(Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn instance_is_registered_until_close() {
    let registry = Arc::new(InstanceRegistry::new());
    let (counters, hooks) = lifecycle(false);

    let bootstrapped = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new().with_hook_source(hooks))
        .run()
        .await
        .expect("bootstrap should succeed");
    let handle = bootstrapped.instance.handle().clone();

    let found = registry.get(&handle).expect("instance should be registered");
    assert!(Arc::ptr_eq(&found, &bootstrapped.instance));
    assert!(Arc::ptr_eq(&registry.get(&handle).expect("present"), &found));
    assert_eq!(counters.before_bootstrap.load(Ordering::SeqCst), 1);
    assert_eq!(counters.after_startup.load(Ordering::SeqCst), 1);
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 0);

    handle.close().await;
    assert!(registry.get(&handle).is_none());
    assert!(registry.is_empty());
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 1);

    handle.close().await;
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hooks_run_only_in_their_phase() {
    let registry = Arc::new(InstanceRegistry::new());
    let (counters, hooks) = lifecycle(false);

    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(ManifestScanner::new().with_hook_source(hooks))
        .run()
        .await
        .expect("bootstrap should succeed");

    assert_eq!(bootstrapped.before_bootstrap.len(), 1);
    assert_eq!(bootstrapped.after_startup.len(), 1);
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 0);
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn failing_hook_does_not_stop_the_others() {
    let registry = Arc::new(InstanceRegistry::new());
    let (counters, hooks) = lifecycle(true);

    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(ManifestScanner::new().with_hook_source(hooks))
        .run()
        .await
        .expect("a failing hook should not fail the bootstrap");

    let outcome = &bootstrapped.after_startup;
    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.succeeded(), 1);
    assert_eq!(outcome.failed(), 1);
    assert_eq!(outcome.failures().next().map(|(name, _)| name), Some("reject-startup"));
    assert_eq!(counters.after_startup.load(Ordering::SeqCst), 1);
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn second_bootstrap_on_the_same_runtime_is_rejected() {
    let registry = Arc::new(InstanceRegistry::new());
    let handle = Runtime::standalone(RuntimeOptions::default());

    Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new())
        .with_runtime(handle.clone())
        .run()
        .await
        .expect("first bootstrap should succeed");
    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new())
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("second bootstrap should fail");

    assert!(matches!(err, BootstrapError::AlreadyBootstrapped(_)));
    assert_eq!(registry.len(), 1);
    handle.close().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn before_bootstrap_hooks_see_the_registered_instance() {
    let registry = Arc::new(InstanceRegistry::new());
    let lookups = Arc::new(AtomicUsize::new(0));
    let source = {
        let registry = Arc::clone(&registry);
        let lookups = Arc::clone(&lookups);
        hooks_from(move || {
            let registry = Arc::clone(&registry);
            let lookups = Arc::clone(&lookups);
            vec![HookDefinition::new::<BeforeBootstrap, _>("lookup", move |ctx| {
                let registry = Arc::clone(&registry);
                let lookups = Arc::clone(&lookups);
                Box::pin(async move {
                    let Some(instance) = ctx.payload::<Instance>() else {
                        return Err(HookError::failed("lookup", "missing instance"));
                    };
                    match registry.get(instance.handle()) {
                        Some(found) if Arc::ptr_eq(&found, &instance) => {
                            lookups.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                        _ => Err(HookError::failed("lookup", "instance not registered yet")),
                    }
                })
            })]
        })
    };

    let bootstrapped = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new().with_hook_source(source))
        .run()
        .await
        .expect("bootstrap should succeed");

    assert_eq!(bootstrapped.before_bootstrap.failed(), 0);
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn closing_from_a_shutdown_hook_completes() {
    let registry = Arc::new(InstanceRegistry::new());
    let source = hooks_from(|| {
        vec![HookDefinition::new::<BeforeShutdown, _>("close-again", |ctx| {
            Box::pin(async move {
                if let Some(instance) = ctx.payload::<Instance>() {
                    instance.handle().close().await;
                }
                Ok(())
            })
        })]
    });

    let bootstrapped = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new().with_hook_source(source))
        .run()
        .await
        .expect("bootstrap should succeed");
    let handle = bootstrapped.instance.handle().clone();

    tokio::time::timeout(Duration::from_secs(3), handle.close())
        .await
        .expect("close should not hang");
    assert!(handle.is_closed());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn closing_during_bootstrap_fails_it_cleanly() {
    let registry = Arc::new(InstanceRegistry::new());
    let (counters, lifecycle_hooks) = lifecycle(false);
    let closer = hooks_from(|| {
        vec![HookDefinition::new::<BeforeBootstrap, _>("close-early", |ctx| {
            Box::pin(async move {
                if let Some(instance) = ctx.payload::<Instance>() {
                    instance.handle().close().await;
                }
                Ok(())
            })
        })]
    });
    let handle = Runtime::standalone(RuntimeOptions::default());

    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(
            ManifestScanner::new()
                .with_hook_source(closer)
                .with_hook_source(lifecycle_hooks)
                .with_deployable(unit_type("late", Profile::CORE, true)),
        )
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("a closed runtime should fail the bootstrap");

    assert!(matches!(err, BootstrapError::RuntimeClosed(_)), "unexpected error: {err}");
    assert!(handle.is_closed());
    assert!(handle.deployment_ids().is_empty());
    assert!(registry.is_empty());
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 1);
    assert_eq!(counters.after_startup.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bootstrap_on_a_closed_runtime_leaves_no_instance() {
    let registry = Arc::new(InstanceRegistry::new());
    let handle = Runtime::standalone(RuntimeOptions::default());
    handle.close().await;

    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new())
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("a closed runtime should fail the bootstrap");

    assert!(matches!(err, BootstrapError::RuntimeClosed(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unknown_time_zone_is_rejected() {
    let err = Bootstrap::new(options().with_time_zone_id("Foo/Bar"))
        .with_registry(Arc::new(InstanceRegistry::new()))
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect_err("an unknown zone should fail the bootstrap");

    assert!(matches!(
        err,
        BootstrapError::Options(OptionsError::Invalid { option: "timeZoneId", .. })
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Directories
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_creates_the_log_directory() {
    let dir = tempfile::tempdir().expect("temp dir");

    let bootstrapped = Bootstrap::new(options().with_working_directory(dir.path()))
        .with_registry(Arc::new(InstanceRegistry::new()))
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect("bootstrap should succeed");

    assert!(dir.path().join("logs").is_dir());
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn unusable_log_directory_is_not_fatal() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("logs"), "not a directory").expect("write");

    let bootstrapped = Bootstrap::new(options().with_working_directory(dir.path()))
        .with_registry(Arc::new(InstanceRegistry::new()))
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect("a missing log directory should not fail the bootstrap");

    assert!(dir.path().join("logs").is_file());
    bootstrapped.instance.handle().close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Units
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn web_profile_gates_units() {
    let registry = Arc::new(InstanceRegistry::new());
    let scanner = ManifestScanner::new()
        .with_deployable(unit_type("core-unit", Profile::CORE, true))
        .with_deployable(unit_type("admin-unit", Profile::new("ADMIN"), true))
        .with_deployable(unit_type("manual-unit", Profile::CORE, true).with_auto_deploy(false));

    let bootstrapped = Bootstrap::new(
        options()
            .with_active_profiles([Profile::WEB, Profile::CORE])
            .with_server_port(0),
    )
    .with_registry(registry)
    .with_scanner(scanner)
    .run()
    .await
    .expect("bootstrap should succeed");

    let names = unit_names(&bootstrapped);
    assert_eq!(names, ["LoggerManagerVerticle", "ServerVerticle", "core-unit"]);
    assert!(!names.contains(&"admin-unit"));

    let handle = bootstrapped.instance.handle().clone();
    assert!(handle.shared_data().local_map(SERVER_MAP_NAME).contains_key("port"));
    handle.close().await;
}

#[tokio::test]
async fn web_units_are_skipped_without_the_web_profile() {
    let registry = Arc::new(InstanceRegistry::new());
    let extra = Deployable::from_verticle(
        Arc::new(Unit {
            name: "web-extra",
            starts: true,
        }),
        &CorrelationId::new("test"),
        Value::Null,
    )
    .expect("deployable");

    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(ManifestScanner::new())
        .with_web_unit(extra)
        .run()
        .await
        .expect("bootstrap should succeed");

    assert_eq!(unit_names(&bootstrapped), ["LoggerManagerVerticle"]);
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn optional_unit_failure_is_reported_not_fatal() {
    let registry = Arc::new(InstanceRegistry::new());
    let scanner = ManifestScanner::new()
        .with_deployable(unit_type("flaky", Profile::CORE, false).with_policy(UnitPolicy::Optional))
        .with_deployable(unit_type("steady", Profile::CORE, true));

    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(scanner)
        .run()
        .await
        .expect("optional failures should not fail the bootstrap");

    assert!(unit_names(&bootstrapped).contains(&"steady"));
    assert_eq!(bootstrapped.unit_failures.len(), 1);
    assert_eq!(bootstrapped.unit_failures[0].name, "flaky");
    bootstrapped.instance.handle().close().await;
}

#[tokio::test]
async fn required_unit_failure_closes_the_runtime() {
    let registry = Arc::new(InstanceRegistry::new());
    let (counters, hooks) = lifecycle(false);
    let scanner = ManifestScanner::new()
        .with_hook_source(hooks)
        .with_deployable(unit_type("broken", Profile::CORE, false))
        .with_deployable(unit_type("steady", Profile::CORE, true));
    let handle = Runtime::standalone(RuntimeOptions::default());

    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(scanner)
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("a required failure should fail the bootstrap");

    let failures = match err {
        BootstrapError::Deployment { failures } => failures,
        other => panic!("expected a deployment failure, got {other}"),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "broken");
    assert!(handle.is_closed());
    assert!(handle.deployment_ids().is_empty());
    assert!(registry.is_empty());
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 1);
    assert_eq!(counters.after_startup.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn discovery_failure_fails_the_bootstrap() {
    let registry = Arc::new(InstanceRegistry::new());
    let handle = Runtime::standalone(RuntimeOptions::default());

    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(BrokenScanner)
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("discovery failure should fail the bootstrap");

    assert!(matches!(err, BootstrapError::Discovery(DiscoveryError::Scan(_))));
    assert!(handle.is_closed());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn ignoring_the_class_path_skips_discovery() {
    let registry = Arc::new(InstanceRegistry::new());

    let bootstrapped = Bootstrap::new(options().with_ignore_class_path(true))
        .with_registry(registry)
        .with_scanner(BrokenScanner)
        .run()
        .await
        .expect("the scanner should not be consulted");

    assert_eq!(unit_names(&bootstrapped), ["LoggerManagerVerticle"]);
    bootstrapped.instance.handle().close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance services
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn async_map_is_local_when_not_clustered() {
    let registry = Arc::new(InstanceRegistry::new());
    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect("bootstrap should succeed");
    let instance = &bootstrapped.instance;

    assert!(!instance.handle().is_clustered());
    let map = instance.async_map().await.expect("async map");
    map.put("greeting", json!("hello")).await.expect("put");
    assert_eq!(
        instance.async_map().await.expect("async map").get("greeting").await.expect("get"),
        Some(json!("hello"))
    );
    instance.handle().close().await;
}

#[tokio::test]
async fn unknown_tracking_strategy_falls_back_to_logging() {
    let registry = Arc::new(InstanceRegistry::new());
    let bootstrapped = Bootstrap::new(options().with_tracking_strategy("com.example.Missing"))
        .with_registry(registry)
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect("an unknown strategy should not fail the bootstrap");

    assert_eq!(bootstrapped.instance.tracking_strategy_name(), "logging");
    bootstrapped.instance.handle().close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_consumers_tolerate_concurrent_updates() {
    let registry = Arc::new(InstanceRegistry::new());
    let bootstrapped = Bootstrap::new(options())
        .with_registry(registry)
        .with_scanner(ManifestScanner::new())
        .run()
        .await
        .expect("bootstrap should succeed");
    let instance = Arc::clone(&bootstrapped.instance);

    for address in 0..50 {
        instance.register_local_consumer(format!("stale-{address}"));
    }
    let tasks: Vec<_> = (0..50)
        .flat_map(|index| {
            let adding = Arc::clone(&instance);
            let removing = Arc::clone(&instance);
            [
                tokio::spawn(async move { adding.register_local_consumer(format!("fresh-{index}")) }),
                tokio::spawn(async move { removing.unregister_local_consumer(&format!("stale-{index}")) }),
            ]
        })
        .collect();
    for task in tasks {
        assert!(task.await.expect("task should not panic"));
    }

    assert!((0..50).all(|index| instance.is_local_consumer_available(&format!("fresh-{index}"))));
    assert!((0..50).all(|index| !instance.is_local_consumer_available(&format!("stale-{index}"))));
    instance.handle().close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Clustering
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn refused_cluster_join_is_fatal() {
    let registry = Arc::new(InstanceRegistry::new());
    let cluster = InMemoryCluster::new();
    cluster.refuse_joins(true);

    let err = Bootstrap::new(options().with_clustered(true))
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new())
        .with_cluster_manager(cluster.manager())
        .run()
        .await
        .expect_err("a refused join should fail the bootstrap");

    assert!(matches!(err, BootstrapError::ClusterJoin(_)));
    assert!(registry.is_empty());
    assert_eq!(cluster.member_count(), 0);
}

#[tokio::test]
async fn unavailable_shared_state_is_fatal() {
    let registry = Arc::new(InstanceRegistry::new());
    let cluster = InMemoryCluster::new();
    let (counters, hooks) = lifecycle(false);
    let node: Arc<dyn ClusterManager> = Arc::new(MaplessNode {
        inner: cluster.manager(),
    });
    let handle = Runtime::clustered(RuntimeOptions::default().with_cluster(ClusterOptions::new(node)))
        .await
        .expect("node should join");
    assert_eq!(cluster.member_count(), 1);

    let err = Bootstrap::new(options())
        .with_registry(Arc::clone(&registry))
        .with_scanner(ManifestScanner::new().with_hook_source(hooks))
        .with_runtime(handle.clone())
        .run()
        .await
        .expect_err("shared state failure should fail the bootstrap");

    assert!(matches!(err, BootstrapError::SharedState(_)), "unexpected error: {err}");
    assert!(handle.is_closed());
    assert!(registry.is_empty());
    assert_eq!(cluster.member_count(), 0);
    assert_eq!(counters.before_shutdown.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clustered_instances_share_async_maps() {
    let registry = Arc::new(InstanceRegistry::new());
    let cluster = InMemoryCluster::new();

    let mut instances = Vec::new();
    for _ in 0..2 {
        let bootstrapped = Bootstrap::new(options().with_clustered(true))
            .with_registry(Arc::clone(&registry))
            .with_scanner(ManifestScanner::new())
            .with_cluster_manager(cluster.manager())
            .run()
            .await
            .expect("bootstrap should succeed");
        instances.push(bootstrapped.instance);
    }
    assert_eq!(registry.len(), 2);
    assert_eq!(cluster.member_count(), 2);

    let writer = instances[0].async_map().await.expect("async map");
    writer.put("leader", json!("node-0")).await.expect("put");
    let reader = instances[1].async_map().await.expect("async map");
    assert_eq!(reader.get("leader").await.expect("get"), Some(json!("node-0")));

    for instance in &instances {
        instance.handle().close().await;
    }
    assert!(registry.is_empty());
    assert_eq!(cluster.member_count(), 0);
}
