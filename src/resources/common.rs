//! Common resource generation utilities.
//!
//! Naming, labels, owner references and the endpoint URLs derived from a
//! Platform. Every generator in this module is pure.

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::{ComponentSpec, Platform, ResourceSpec};

/// Label value identifying objects managed by this operator
pub const MANAGED_BY: &str = "platform-operator";

/// Label carrying the owning instance name (also used on cluster-scoped objects)
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Label carrying the owning instance namespace on cluster-scoped objects
pub const INSTANCE_NAMESPACE_LABEL: &str = "platformoperator.io/instance-namespace";

/// Default broker port (AMQP)
pub const BROKER_PORT: i32 = 5672;

/// Default API port
pub const API_PORT: i32 = 8080;

/// Standard labels applied to all managed resources
pub fn standard_labels(instance: &Platform, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), instance.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "platform".to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &instance.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Labels used for pod selection.
///
/// Deliberately excludes user labels so selectors stay immutable.
pub fn selector_labels(instance: &Platform, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), instance.name_any());
    labels
}

/// Create owner reference for a Platform
pub fn owner_reference(instance: &Platform) -> OwnerReference {
    OwnerReference {
        api_version: Platform::api_version(&()).to_string(),
        kind: Platform::kind(&()).to_string(),
        name: instance.name_any(),
        uid: instance.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Namespace of an instance, defaulting to "default" for objects built in tests.
pub fn instance_namespace(instance: &Platform) -> String {
    instance.namespace().unwrap_or_else(|| "default".to_string())
}

/// Name of a workload or object belonging to an instance (`<instance>-<suffix>`).
pub fn object_name(instance: &Platform, suffix: &str) -> String {
    format!("{}-{}", instance.name_any(), suffix)
}

/// Name of the CA root secret removed on finalization.
pub fn ca_root_secret_name(instance: &Platform) -> String {
    object_name(instance, "ca-root")
}

/// Names of the operator's PriorityClasses (high, default).
///
/// PriorityClasses are cluster-scoped so the namespace is part of the name.
pub fn priority_class_names(instance: &Platform) -> [String; 2] {
    let base = format!("{}-{}", instance_namespace(instance), instance.name_any());
    [format!("{}-high", base), format!("{}-default", base)]
}

/// Full image reference for a component.
pub fn image(instance: &Platform, component: &ComponentSpec, image_name: &str) -> String {
    let tag = component
        .image_tag
        .as_deref()
        .unwrap_or(instance.spec.version.as_str());
    format!(
        "{}/{}:{}",
        instance.spec.image_registry.trim_end_matches('/'),
        image_name,
        tag
    )
}

/// Broker connection URL: the in-cluster service, or the external override.
pub fn broker_url(instance: &Platform) -> String {
    let broker = &instance.spec.broker;
    match (&broker.external, broker.deploy) {
        (Some(ext), false) => format!("amqp://{}:{}", ext.host, ext.port),
        _ => format!(
            "amqp://{}.{}.svc:{}",
            object_name(instance, "broker"),
            instance_namespace(instance),
            BROKER_PORT
        ),
    }
}

/// Public API base URL: the configured host, or the in-cluster service.
pub fn api_url(instance: &Platform) -> String {
    match instance.spec.api_host.as_deref() {
        Some(host) if !host.is_empty() => format!("https://{}", host),
        _ => format!(
            "http://{}.{}.svc:{}",
            object_name(instance, "api"),
            instance_namespace(instance),
            API_PORT
        ),
    }
}

/// Subsystems other workloads connect to that are neither deployed nor
/// given an external endpoint.
pub fn missing_external_endpoints(instance: &Platform) -> Vec<&'static str> {
    let spec = &instance.spec;
    [("broker", &spec.broker), ("storage", &spec.storage)]
        .into_iter()
        .filter(|(_, component)| !component.deploy && component.external.is_none())
        .map(|(name, _)| name)
        .collect()
}

/// Convert CRD resource quantities into container requirements.
pub fn resource_requirements(component: &ComponentSpec) -> Option<ResourceRequirements> {
    fn quantities(spec: &ResourceSpec) -> Option<BTreeMap<String, Quantity>> {
        let mut map = BTreeMap::new();
        if let Some(cpu) = &spec.cpu {
            map.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &spec.memory {
            map.insert("memory".to_string(), Quantity(memory.clone()));
        }
        if map.is_empty() { None } else { Some(map) }
    }

    let requests = quantities(&component.resources.requests);
    let limits = quantities(&component.resources.limits);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        requests,
        limits,
        ..Default::default()
    })
}
