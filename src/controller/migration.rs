//! Legacy-state migration.
//!
//! Instances created by the previous generation of the operator have no
//! reconciliation phase, stateful workloads named `<instance>-mq`,
//! `<instance>-certs`, `<instance>-db` and `<instance>-gw`, and may store
//! cpu/memory quantities as bare numbers.
//!
//! Migration normalizes the stored spec and orphan-deletes the old
//! StatefulSets, leaving their pods and volumes in place. The orphaned pods
//! are relabelled with the current selector so that the replacement
//! StatefulSet adopts them. Volume names embed the StatefulSet name, so a
//! migrated instance keeps the legacy StatefulSet names for good
//! (`status.legacyWorkloadNames`). Status is reconstructed from what was
//! running: the version read from the legacy broker image and the health
//! of the legacy workloads.

use kube::ResourceExt;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::components::StatefulComponent;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::health_scorer::compute_health;
use crate::controller::phase_machine::{PhaseEvent, PhaseMachine};
use crate::controller::status::{OPERATOR_VERSION, write_status};
use crate::crd::{Platform, ReconciliationPhase};
use crate::quantity::LeafValue;
use crate::resources::common::{api_url, broker_url, instance_namespace, selector_labels};
use crate::store::{ClusterStore, Propagation, ResourceKind};
use crate::version::image_tag;

const QUANTITY_SECTIONS: [&str; 2] = ["requests", "limits"];
const QUANTITY_KEYS: [&str; 2] = ["cpu", "memory"];

/// Migrate legacy state when present.
///
/// Only acts when the instance has no phase and the legacy broker
/// StatefulSet exists. Returns whether a migration was performed. Any
/// failing step aborts the migration and later steps are not attempted.
pub async fn migrate_if_needed<S: ClusterStore>(ctx: &Context<S>, instance: &Platform) -> Result<bool> {
    let has_phase = instance
        .status
        .as_ref()
        .is_some_and(|s| s.reconciliation_phase.is_some());
    if has_phase {
        return Ok(false);
    }

    let name = instance.name_any();
    let namespace = instance_namespace(instance);
    // The legacy broker StatefulSet marks legacy state
    let legacy_broker_name = StatefulComponent::BROKER.legacy_workload_name(instance);

    let Some(legacy_broker) = ctx
        .store
        .get_object(ResourceKind::StatefulSet, &namespace, &legacy_broker_name)
        .await?
    else {
        return Ok(false);
    };

    info!(instance = %name, namespace = %namespace, "Legacy state detected, migrating");

    // Normalize the stored spec
    let mut document = ctx.store.get_instance_document(&namespace, &name).await?;
    let normalized = normalize_document(&mut document)?;
    if normalized > 0 {
        ctx.store
            .replace_instance_document(&namespace, &name, &document)
            .await?;
        info!(instance = %name, leaves = normalized, "Normalized legacy resource quantities");
    }

    // Sampled before the legacy StatefulSets go away
    let mut legacy_view = instance.clone();
    legacy_view.status.get_or_insert_default().legacy_workload_names = Some(true);
    let legacy_health = compute_health(&ctx.store, &legacy_view).await;

    // Drop the legacy workloads without touching pods or volumes, then hand
    // the pods over to the replacement StatefulSets
    for component in StatefulComponent::ALL {
        let legacy_name = component.legacy_workload_name(instance);
        let Some(legacy) = ctx
            .store
            .get_object(ResourceKind::StatefulSet, &namespace, &legacy_name)
            .await?
        else {
            continue;
        };

        ctx.store
            .delete_object(
                ResourceKind::StatefulSet,
                &namespace,
                &legacy_name,
                Propagation::Orphan,
            )
            .await?;
        info!(instance = %name, statefulset = %legacy_name, "Orphan-deleted legacy StatefulSet");

        adopt_pods(ctx, instance, &component, &legacy).await?;
    }

    // Reconstruct status from what was running
    let live_version = legacy_image(&legacy_broker).and_then(|image| image_tag(&image));
    if live_version.is_none() {
        warn!(instance = %name, "Legacy broker image has no tag, platform version unknown");
    }

    let phase = PhaseMachine::new()
        .transition(ReconciliationPhase::Unknown, PhaseEvent::Migrated)
        .target()
        .unwrap_or(ReconciliationPhase::Reconciling);
    let api = api_url(instance);
    let broker = broker_url(instance);

    write_status(ctx, instance, |status| {
        status.reconciliation_phase = Some(phase);
        status.legacy_workload_names = Some(true);
        status.health = Some(legacy_health);
        status.platform_version = live_version.clone();
        status.operator_version = Some(OPERATOR_VERSION.to_string());
        status.api_url = Some(api.clone());
        status.broker_url = Some(broker.clone());
    })
    .await?;

    info!(
        instance = %name,
        version = ?live_version,
        health = %legacy_health,
        "Legacy state migrated"
    );
    Ok(true)
}

/// Relabel the orphaned pods of a legacy StatefulSet with the current
/// selector labels. The replacement keeps the legacy name, so it adopts
/// pods `<name>-0..replicas` instead of colliding with them.
async fn adopt_pods<S: ClusterStore>(
    ctx: &Context<S>,
    instance: &Platform,
    component: &StatefulComponent,
    legacy: &Value,
) -> Result<()> {
    let namespace = instance_namespace(instance);
    let legacy_name = component.legacy_workload_name(instance);
    let replicas = legacy
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);

    for ordinal in 0..replicas.max(0) {
        let pod = format!("{}-{}", legacy_name, ordinal);
        if ctx
            .store
            .get_object(ResourceKind::Pod, &namespace, &pod)
            .await?
            .is_none()
        {
            continue;
        }
        let body = json!({
            "apiVersion": ResourceKind::Pod.api_version(),
            "kind": ResourceKind::Pod.to_string(),
            "metadata": {
                "name": pod,
                "labels": selector_labels(instance, component.name),
            }
        });
        ctx.store
            .patch_object(ResourceKind::Pod, &namespace, &pod, &body)
            .await?;
        debug!(instance = %instance.name_any(), pod = %pod, "Relabelled legacy pod for adoption");
    }
    Ok(())
}

fn legacy_image(statefulset: &Value) -> Option<String> {
    statefulset
        .pointer("/spec/template/spec/containers/0/image")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Normalize every `resources.{requests,limits}.{cpu,memory}` leaf under
/// `spec` to a canonical quantity string.
///
/// Returns the number of rewritten leaves. An unparseable leaf is a
/// migration error naming its key path.
pub fn normalize_document(document: &mut Value) -> Result<usize> {
    let mut rewritten = 0;
    if let Some(spec) = document.get_mut("spec") {
        let mut path = vec!["spec".to_string()];
        walk(spec, &mut path, &mut rewritten)?;
    }
    Ok(rewritten)
}

fn walk(value: &mut Value, path: &mut Vec<String>, rewritten: &mut usize) -> Result<()> {
    let Value::Object(map) = value else {
        return Ok(());
    };

    for (key, child) in map.iter_mut() {
        path.push(key.clone());
        if key == "resources" {
            normalize_resources(child, path, rewritten)?;
        } else {
            walk(child, path, rewritten)?;
        }
        path.pop();
    }
    Ok(())
}

fn normalize_resources(resources: &mut Value, path: &mut Vec<String>, rewritten: &mut usize) -> Result<()> {
    for section in QUANTITY_SECTIONS {
        let Some(Value::Object(quantities)) = resources.get_mut(section) else {
            continue;
        };
        for key in QUANTITY_KEYS {
            let Some(leaf) = quantities.get_mut(key) else {
                continue;
            };
            if leaf.is_null() {
                continue;
            }

            let leaf_path = format!("{}.{}.{}", path.join("."), section, key);
            let canonical = LeafValue::from_json(leaf)
                .ok_or_else(|| Error::Migration(format!("{}: not a quantity: {}", leaf_path, leaf)))?
                .canonical()
                .map_err(|e| Error::Migration(format!("{}: {}", leaf_path, e)))?;

            if leaf.as_str() != Some(canonical.as_str()) {
                *leaf = Value::String(canonical);
                *rewritten += 1;
            }
        }
    }
    Ok(())
}
