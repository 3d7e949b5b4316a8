//! Full reconciliation passes.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use platform_operator::controller::context::Context;
use platform_operator::controller::finalizer::FINALIZER;
use platform_operator::controller::notifications::NotificationReason;
use platform_operator::controller::reconciler::error_policy;
use platform_operator::controller::status::OPERATOR_VERSION;
use platform_operator::crd::{HealthLevel, ReconciliationPhase};
use platform_operator::store::ResourceKind;

use crate::common::fixtures::{PlatformBuilder, test_context};
use crate::common::memory_store::MemoryStore;
use crate::{NS, pass};

const STATEFULSETS: [&str; 4] = ["acme-broker", "acme-storage", "acme-ca", "acme-broker-gateway"];
const DEPLOYMENTS: [&str; 7] = [
    "acme-identity",
    "acme-registry",
    "acme-api",
    "acme-ingest",
    "acme-processor",
    "acme-notifier",
    "acme-dashboard",
];

fn phases(store: &MemoryStore) -> Vec<ReconciliationPhase> {
    store
        .status_history()
        .iter()
        .map(|s| s.phase())
        .collect()
}

/// A converged, healthy platform at version 1.5.
fn healthy_platform() -> Arc<Context<MemoryStore>> {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("1.5")
            .phase(ReconciliationPhase::Reconciled)
            .recorded_version("1.5")
            .health(HealthLevel::Green)
            .build(),
    );
    test_context(store)
}

#[tokio::test]
async fn test_fresh_install_lifecycle() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .without_finalizer()
            .build(),
    );
    let ctx = test_context(store);

    // Finalizer first
    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    let instance = ctx.store.instance(NS, "acme");
    assert_eq!(instance.metadata.finalizers, Some(vec![FINALIZER.to_string()]));
    assert!(instance.status.is_none());

    // Then a starting status
    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(2)));
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciling);
    assert_eq!(status.operator_version.as_deref(), Some(OPERATOR_VERSION));
    assert!(ctx.store.object_names(ResourceKind::StatefulSet).is_empty());

    // Then convergence
    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    for name in STATEFULSETS {
        assert!(ctx.store.object(ResourceKind::StatefulSet, NS, name).is_some(), "{}", name);
        assert!(ctx.store.object(ResourceKind::Service, NS, name).is_some(), "{}", name);
    }
    for name in DEPLOYMENTS {
        assert!(ctx.store.object(ResourceKind::Deployment, NS, name).is_some(), "{}", name);
    }
    assert_eq!(ctx.store.object_names(ResourceKind::PriorityClass).len(), 2);
    assert_eq!(ctx.store.object_names(ResourceKind::Secret).len(), 3);
    assert!(ctx.store.object(ResourceKind::ConfigMap, NS, "acme-runtime-config").is_some());
    // 1.0.0 is past the legacy CA layout
    assert!(ctx.store.object_names(ResourceKind::Job).is_empty());

    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciled);
    assert_eq!(status.platform_version.as_deref(), Some("1.0.0"));
    assert_eq!(status.health, Some(HealthLevel::Red));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.broker_url.as_deref(), Some("amqp://acme-broker.prod.svc:5672"));
    assert_eq!(status.api_url.as_deref(), Some("http://acme-api.prod.svc:8080"));

    // Workloads come up
    ctx.store.mark_all_ready();
    pass(&ctx, "acme").await.unwrap();
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.health, Some(HealthLevel::Green));
    assert!(
        ctx.store
            .notification_reasons()
            .contains(&NotificationReason::StatusChanged)
    );
}

#[tokio::test]
async fn test_steady_state_pass_writes_nothing() {
    let ctx = healthy_platform();
    pass(&ctx, "acme").await.unwrap();
    ctx.store.mark_all_ready();
    pass(&ctx, "acme").await.unwrap();

    ctx.store.clear_writes();
    let statuses = ctx.store.status_history().len();
    let notifications = ctx.store.notifications().len();

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    assert!(ctx.store.writes().is_empty(), "{:?}", ctx.store.writes());
    assert_eq!(ctx.store.status_history().len(), statuses);
    assert_eq!(ctx.store.notifications().len(), notifications);
}

#[tokio::test]
async fn test_upgrade_from_green_platform() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("2.0")
            .phase(ReconciliationPhase::Reconciled)
            .recorded_version("1.5")
            .health(HealthLevel::Green)
            .build(),
    );
    let ctx = test_context(store);

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));

    let history = phases(&ctx.store);
    assert_eq!(
        history,
        vec![ReconciliationPhase::Upgrading, ReconciliationPhase::Reconciled]
    );
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.platform_version.as_deref(), Some("2.0"));
    assert!(
        ctx.store
            .notification_reasons()
            .contains(&NotificationReason::UpgradeStarted)
    );
}

#[tokio::test]
async fn test_upgrade_blocked_when_unhealthy() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("2.0")
            .phase(ReconciliationPhase::Reconciled)
            .recorded_version("1.5")
            .health(HealthLevel::Red)
            .build(),
    );
    let ctx = test_context(store);

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));

    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciled);
    assert_eq!(status.platform_version.as_deref(), Some("1.5"));
    assert!(ctx.store.writes().is_empty());

    let notifications = ctx.store.notifications();
    let blocked = notifications
        .iter()
        .find(|n| n.reason == NotificationReason::UpgradeBlocked)
        .unwrap();
    assert!(blocked.message.contains("blocked"));
}

#[tokio::test]
async fn test_upgrade_allowed_by_computed_health() {
    let ctx = healthy_platform();
    pass(&ctx, "acme").await.unwrap();
    ctx.store.mark_all_ready();

    // Persisted health is stale, live workloads are all ready
    let mut instance = ctx.store.instance(NS, "acme");
    instance.spec.version = "2.0".to_string();
    instance.status.as_mut().unwrap().health = Some(HealthLevel::Red);
    ctx.store.insert_instance(&instance);

    pass(&ctx, "acme").await.unwrap();
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciled);
    assert_eq!(status.platform_version.as_deref(), Some("2.0"));
    assert!(phases(&ctx.store).contains(&ReconciliationPhase::Upgrading));

    // The runtime configuration follows the new version
    let config = ctx
        .store
        .object(ResourceKind::ConfigMap, NS, "acme-runtime-config")
        .unwrap();
    assert_eq!(config["data"]["PLATFORM_VERSION"], "2.0");
}

#[tokio::test]
async fn test_invalid_version_marks_failed_only() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("not-a-version")
            .phase(ReconciliationPhase::Reconciled)
            .recorded_version("1.5")
            .health(HealthLevel::Green)
            .build(),
    );
    let ctx = test_context(store);

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Failed);
    assert_eq!(status.platform_version.as_deref(), Some("1.5"));
    assert_eq!(status.health, Some(HealthLevel::Green));
    assert!(ctx.store.writes().is_empty());
    assert_eq!(
        ctx.store.notification_reasons(),
        vec![NotificationReason::InconsistentVersion]
    );
}

#[tokio::test]
async fn test_disabled_component_without_endpoint_is_refused() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("1.5")
            .phase(ReconciliationPhase::Reconciled)
            .recorded_version("1.5")
            .spec(|spec| spec.storage.deploy = false)
            .build(),
    );
    let ctx = test_context(store);

    let err = pass(&ctx, "acme").await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("storage"), "{}", err);
    assert_eq!(
        ctx.store.notification_reasons(),
        vec![NotificationReason::MissingExternalEndpoint]
    );

    // Nothing converged against an endpoint that does not exist
    assert!(ctx.store.writes().is_empty());
    assert!(ctx.store.status_history().is_empty());
}

#[tokio::test]
async fn test_maintenance_refreshes_health_only() {
    let ctx = healthy_platform();
    let mut instance = ctx.store.instance(NS, "acme");
    instance.spec.maintenance = true;
    ctx.store.insert_instance(&instance);

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::ManualMaintenance);
    assert_eq!(status.health, Some(HealthLevel::Red));
    assert!(ctx.store.writes().is_empty());

    // Switching maintenance off resumes convergence
    let mut instance = ctx.store.instance(NS, "acme");
    instance.spec.maintenance = false;
    ctx.store.insert_instance(&instance);

    pass(&ctx, "acme").await.unwrap();
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciled);
    assert!(!ctx.store.writes().is_empty());
}

#[tokio::test]
async fn test_status_write_survives_conflicts() {
    let store = MemoryStore::new();
    store.insert_instance(&PlatformBuilder::new("acme").namespace(NS).build());
    store.conflict_next_status_writes(3);
    let ctx = test_context(store);

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(2)));
    let status = ctx.store.instance(NS, "acme").status.unwrap();
    assert_eq!(status.phase(), ReconciliationPhase::Reconciling);
}

#[tokio::test]
async fn test_status_write_gives_up_after_max_attempts() {
    let store = MemoryStore::new();
    store.insert_instance(&PlatformBuilder::new("acme").namespace(NS).build());
    store.conflict_next_status_writes(10);
    let ctx = test_context(store);

    let err = pass(&ctx, "acme").await.unwrap_err();
    assert!(err.is_conflict());
    assert!(ctx.store.instance(NS, "acme").status.is_none());

    let action = error_policy(
        Arc::new(ctx.store.instance(NS, "acme")),
        &err,
        ctx.clone(),
    );
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_component_failure_aborts_pass() {
    let ctx = healthy_platform();
    ctx.store.fail_create(ResourceKind::StatefulSet, "acme-storage");

    let err = pass(&ctx, "acme").await.unwrap_err();
    assert!(err.is_retryable());

    assert!(ctx.store.object(ResourceKind::StatefulSet, NS, "acme-broker").is_some());
    assert!(ctx.store.object(ResourceKind::StatefulSet, NS, "acme-ca").is_none());
    assert!(ctx.store.object(ResourceKind::Deployment, NS, "acme-api").is_none());
    assert!(
        ctx.store
            .notification_reasons()
            .contains(&NotificationReason::ReconciliationFailed)
    );
    assert!(ctx.store.status_history().is_empty());
}

#[tokio::test]
async fn test_pre_1_0_platform_runs_legacy_ca_job() {
    let store = MemoryStore::new();
    store.insert_instance(
        &PlatformBuilder::new("acme")
            .namespace(NS)
            .version("0.9.4-SNAPSHOT")
            .phase(ReconciliationPhase::Reconciling)
            .build(),
    );
    let ctx = test_context(store);

    pass(&ctx, "acme").await.unwrap();
    assert_eq!(
        ctx.store.object_names(ResourceKind::Job),
        vec!["acme-ca-secret-migration".to_string()]
    );
}

#[tokio::test]
async fn test_not_found_awaits_change() {
    let ctx = test_context(MemoryStore::new());
    let err = crate::common::memory_store::api_error(404, "NotFound");
    let instance = PlatformBuilder::new("gone").namespace(NS).build();
    assert_eq!(
        error_policy(Arc::new(instance), &err, ctx),
        Action::await_change()
    );
}
