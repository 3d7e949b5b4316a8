//! Cleanup on deletion.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use serde_json::json;

use platform_operator::controller::finalizer::finalize;
use platform_operator::crd::ReconciliationPhase;
use platform_operator::store::ResourceKind;

use crate::common::fixtures::{PlatformBuilder, test_context};
use crate::common::memory_store::MemoryStore;
use crate::{NS, pass};

/// A platform being deleted, with leftovers owner references do not cover.
fn deleting_store() -> MemoryStore {
    let store = MemoryStore::new();
    let mut instance = PlatformBuilder::new("acme")
        .namespace(NS)
        .phase(ReconciliationPhase::Reconciled)
        .build();
    instance.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
    store.insert_instance(&instance);

    store.insert_object(
        ResourceKind::Secret,
        NS,
        json!({"metadata": {"name": "acme-ca-root", "namespace": NS}}),
    );
    for class in ["prod-acme-high", "prod-acme-default"] {
        store.insert_object(ResourceKind::PriorityClass, NS, json!({"metadata": {"name": class}}));
    }
    for claim in [
        "broker-data-acme-broker-0",
        "storage-data-acme-storage-0",
        "ca-data-acme-ca-0",
        "gateway-data-acme-broker-gateway-0",
        "unrelated-data-0",
    ] {
        store.insert_object(
            ResourceKind::PersistentVolumeClaim,
            NS,
            json!({"metadata": {"name": claim, "namespace": NS}}),
        );
    }
    store
}

#[tokio::test]
async fn test_deletion_cleans_up_and_releases() {
    let ctx = test_context(deleting_store());

    let action = pass(&ctx, "acme").await.unwrap();
    assert_eq!(action, Action::await_change());

    assert!(ctx.store.object(ResourceKind::Secret, NS, "acme-ca-root").is_none());
    assert!(ctx.store.object_names(ResourceKind::PriorityClass).is_empty());
    assert_eq!(
        ctx.store.object_names(ResourceKind::PersistentVolumeClaim),
        vec!["unrelated-data-0".to_string()]
    );
    let instance = ctx.store.instance(NS, "acme");
    assert!(instance.metadata.finalizers.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_cleanup_continues_past_failures() {
    let store = deleting_store();
    store.fail_delete(ResourceKind::PersistentVolumeClaim, "storage-data-acme-storage-0");
    let ctx = test_context(store);

    let instance = ctx.store.instance(NS, "acme");
    let report = finalize(&ctx, &instance).await.unwrap();
    assert!(report.ca_secret_deleted);
    assert_eq!(report.priority_classes_deleted, 2);
    assert_eq!(report.volumes_deleted.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "storage-data-acme-storage-0");
    assert!(!report.is_clean());

    // The finalizer is still released
    pass(&ctx, "acme").await.unwrap();
    let instance = ctx.store.instance(NS, "acme");
    assert!(instance.metadata.finalizers.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_secret_failure_does_not_stop_volume_cleanup() {
    let store = deleting_store();
    store.fail_delete(ResourceKind::Secret, "acme-ca-root");
    let ctx = test_context(store);

    let report = finalize(&ctx, &ctx.store.instance(NS, "acme")).await.unwrap();
    assert!(!report.ca_secret_deleted);
    assert_eq!(report.volumes_deleted.len(), 4);
}

#[tokio::test]
async fn test_volume_listing_failure_keeps_finalizer() {
    let store = deleting_store();
    store.fail_list(ResourceKind::PersistentVolumeClaim);
    let ctx = test_context(store);

    assert!(pass(&ctx, "acme").await.is_err());
    let instance = ctx.store.instance(NS, "acme");
    assert_eq!(instance.metadata.finalizers.map(|f| f.len()), Some(1));
}

#[tokio::test]
async fn test_deletion_spares_other_instances_in_namespace() {
    let store = deleting_store();
    store.insert_instance(&PlatformBuilder::new("other").namespace(NS).build());
    for claim in [
        "broker-data-other-broker-0",
        "storage-data-other-storage-0",
        "broker-data-acme-mq-0",
    ] {
        store.insert_object(
            ResourceKind::PersistentVolumeClaim,
            NS,
            json!({"metadata": {"name": claim, "namespace": NS}}),
        );
    }
    let ctx = test_context(store);

    let report = finalize(&ctx, &ctx.store.instance(NS, "acme")).await.unwrap();
    assert!(report.is_clean());
    assert!(report.volumes_deleted.contains(&"broker-data-acme-mq-0".to_string()));

    let mut remaining = ctx.store.object_names(ResourceKind::PersistentVolumeClaim);
    remaining.sort();
    assert_eq!(
        remaining,
        vec![
            "broker-data-other-broker-0".to_string(),
            "storage-data-other-storage-0".to_string(),
            "unrelated-data-0".to_string(),
        ]
    );
}
