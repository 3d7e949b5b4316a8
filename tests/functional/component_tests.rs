//! Component convergence, removal and health sampling.

use platform_operator::components::{ComponentId, StatefulComponent, StatelessComponent, ensure};
use platform_operator::controller::health_scorer::{Readiness, compute_health, sample};
use platform_operator::controller::sequencer::Sequencer;
use platform_operator::crd::HealthLevel;
use platform_operator::store::ResourceKind;

use crate::NS;
use crate::common::fixtures::{PlatformBuilder, test_context};
use crate::common::memory_store::{MemoryStore, Write};

#[tokio::test]
async fn test_ensure_is_idempotent() {
    let store = MemoryStore::new();
    let instance = PlatformBuilder::new("acme").namespace(NS).build();

    assert!(ensure(&store, &instance, &StatefulComponent::BROKER).await.unwrap());
    assert_eq!(
        store.writes(),
        vec![
            Write::Created(ResourceKind::StatefulSet, "acme-broker".to_string()),
            Write::Created(ResourceKind::Service, "acme-broker".to_string()),
        ]
    );

    store.clear_writes();
    assert!(!ensure(&store, &instance, &StatefulComponent::BROKER).await.unwrap());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_ensure_patches_drift() {
    let store = MemoryStore::new();
    let mut instance = PlatformBuilder::new("acme").namespace(NS).build();
    ensure(&store, &instance, &StatelessComponent::API).await.unwrap();

    instance.spec.services.api.replicas = 3;
    store.clear_writes();
    assert!(ensure(&store, &instance, &StatelessComponent::API).await.unwrap());
    assert_eq!(
        store.writes(),
        vec![Write::Patched(ResourceKind::Deployment, "acme-api".to_string())]
    );
    let deployment = store.object(ResourceKind::Deployment, NS, "acme-api").unwrap();
    assert_eq!(deployment["spec"]["replicas"], 3);
}

#[tokio::test]
async fn test_disabled_component_is_removed() {
    let store = MemoryStore::new();
    let mut instance = PlatformBuilder::new("acme").namespace(NS).build();
    ensure(&store, &instance, &StatefulComponent::BROKER_GATEWAY).await.unwrap();
    assert!(store.object(ResourceKind::StatefulSet, NS, "acme-broker-gateway").is_some());

    instance.spec.gateway.deploy = false;
    assert!(ensure(&store, &instance, &StatefulComponent::BROKER_GATEWAY).await.unwrap());
    assert!(store.object(ResourceKind::StatefulSet, NS, "acme-broker-gateway").is_none());
    assert!(store.object(ResourceKind::Service, NS, "acme-broker-gateway").is_none());

    // Nothing left to remove
    assert!(!ensure(&store, &instance, &StatefulComponent::BROKER_GATEWAY).await.unwrap());
}

#[tokio::test]
async fn test_credentials_are_never_rotated() {
    let store = MemoryStore::new();
    let instance = PlatformBuilder::new("acme").namespace(NS).build();
    let credentials = ComponentId::Credentials.component();

    ensure(&store, &instance, credentials.as_ref()).await.unwrap();
    let first = store.object(ResourceKind::Secret, NS, "acme-broker-credentials").unwrap();

    assert!(!ensure(&store, &instance, credentials.as_ref()).await.unwrap());
    let second = store.object(ResourceKind::Secret, NS, "acme-broker-credentials").unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_priority_classes_follow_feature_flag() {
    let store = MemoryStore::new();
    let instance = PlatformBuilder::new("acme")
        .namespace(NS)
        .spec(|spec| spec.features.priority_classes = false)
        .build();
    let ctx = test_context(store);

    Sequencer::run(&ctx, &instance).await.unwrap();
    assert!(ctx.store.object_names(ResourceKind::PriorityClass).is_empty());
    let broker = ctx.store.object(ResourceKind::StatefulSet, NS, "acme-broker").unwrap();
    assert!(broker.pointer("/spec/template/spec/priorityClassName").is_none());
}

#[tokio::test]
async fn test_sequencer_converges_in_order() {
    let instance = PlatformBuilder::new("acme").namespace(NS).build();
    let ctx = test_context(MemoryStore::new());

    Sequencer::run(&ctx, &instance).await.unwrap();

    let created: Vec<String> = ctx
        .store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            Write::Created(ResourceKind::StatefulSet | ResourceKind::Deployment, name) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        vec![
            "acme-broker",
            "acme-storage",
            "acme-ca",
            "acme-identity",
            "acme-registry",
            "acme-api",
            "acme-ingest",
            "acme-processor",
            "acme-notifier",
            "acme-broker-gateway",
            "acme-dashboard",
        ]
    );
}

#[tokio::test]
async fn test_health_levels_from_live_workloads() {
    let instance = PlatformBuilder::new("acme").namespace(NS).build();
    let ctx = test_context(MemoryStore::new());
    Sequencer::run(&ctx, &instance).await.unwrap();

    ctx.store.mark_all_ready();
    assert_eq!(compute_health(&ctx.store, &instance).await, HealthLevel::Green);

    ctx.store.set_ready(ResourceKind::Deployment, NS, "acme-ingest", false);
    assert_eq!(compute_health(&ctx.store, &instance).await, HealthLevel::Yellow);

    ctx.store.fail_get(ResourceKind::StatefulSet, "acme-storage");
    assert_eq!(compute_health(&ctx.store, &instance).await, HealthLevel::Red);

    let samples = sample(&ctx.store, &instance).await;
    assert_eq!(samples.len(), 11);
    let storage = samples.iter().find(|s| s.component == "storage").unwrap();
    assert_eq!(storage.readiness, Readiness::Unreachable);
}

#[tokio::test]
async fn test_disabled_components_are_not_sampled() {
    let instance = PlatformBuilder::new("acme")
        .namespace(NS)
        .spec(|spec| {
            spec.dashboard.deploy = false;
            spec.gateway.deploy = false;
        })
        .build();
    let ctx = test_context(MemoryStore::new());
    Sequencer::run(&ctx, &instance).await.unwrap();
    ctx.store.mark_all_ready();

    let samples = sample(&ctx.store, &instance).await;
    assert_eq!(samples.len(), 9);
    assert_eq!(compute_health(&ctx.store, &instance).await, HealthLevel::Green);
}

#[tokio::test]
async fn test_missing_workload_counts_as_failing() {
    let instance = PlatformBuilder::new("acme").namespace(NS).build();
    let store = MemoryStore::new();
    ensure(&store, &instance, &StatefulComponent::BROKER).await.unwrap();
    store.mark_all_ready();

    let samples = sample(&store, &instance).await;
    let missing = samples
        .iter()
        .filter(|s| s.readiness == Readiness::Missing)
        .count();
    assert_eq!(missing, 10);
    assert_eq!(compute_health(&store, &instance).await, HealthLevel::Red);
}
