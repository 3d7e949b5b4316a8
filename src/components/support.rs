//! Components without a readiness-bearing workload.

use std::collections::BTreeMap;

use kube::ResourceExt;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::controller::error::Result;
use crate::crd::Platform;
use crate::resources::common::{
    api_url, broker_url, ca_root_secret_name, image, instance_namespace, object_name,
    priority_class_names,
};
use crate::resources::converge::ManagedObject;
use crate::resources::workloads::{
    generate_configmap, generate_job, generate_priority_class, generate_secret,
    runtime_config_name,
};
use crate::store::ResourceKind;

use super::Component;

/// Length of generated passwords and keys
const SECRET_LENGTH: usize = 32;

/// Priority of stateful infrastructure pods
const HIGH_PRIORITY: i32 = 1_000_000;
/// Priority of stateless service pods
const DEFAULT_PRIORITY: i32 = 1_000;

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Generated credentials. Created once and never rotated by the operator.
pub struct Credentials;

impl Credentials {
    pub fn broker_secret_name(instance: &Platform) -> String {
        object_name(instance, "broker-credentials")
    }

    pub fn storage_secret_name(instance: &Platform) -> String {
        object_name(instance, "storage-credentials")
    }

    pub fn signing_key_name(instance: &Platform) -> String {
        object_name(instance, "api-signing-key")
    }
}

impl Component for Credentials {
    fn name(&self) -> &'static str {
        "credentials"
    }

    fn enabled(&self, _instance: &Platform) -> bool {
        true
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        let user_password = || {
            BTreeMap::from([
                ("username".to_string(), "platform".to_string()),
                ("password".to_string(), random_secret()),
            ])
        };

        Ok(vec![
            ManagedObject::create_only(
                ResourceKind::Secret,
                &generate_secret(
                    instance,
                    &Self::broker_secret_name(instance),
                    "broker",
                    user_password(),
                ),
            )?,
            ManagedObject::create_only(
                ResourceKind::Secret,
                &generate_secret(
                    instance,
                    &Self::storage_secret_name(instance),
                    "storage",
                    user_password(),
                ),
            )?,
            ManagedObject::create_only(
                ResourceKind::Secret,
                &generate_secret(
                    instance,
                    &Self::signing_key_name(instance),
                    "api",
                    BTreeMap::from([("signing-key".to_string(), random_secret())]),
                ),
            )?,
        ])
    }
}

/// Shared runtime configuration consumed by every workload through `envFrom`.
pub struct RuntimeConfig;

impl RuntimeConfig {
    pub fn data(instance: &Platform) -> BTreeMap<String, String> {
        let namespace = instance_namespace(instance);
        let storage = &instance.spec.storage;
        let (storage_host, storage_port) = match (&storage.external, storage.deploy) {
            (Some(ext), false) => (ext.host.clone(), ext.port.to_string()),
            _ => (
                format!("{}.{}.svc", object_name(instance, "storage"), namespace),
                "9042".to_string(),
            ),
        };

        BTreeMap::from([
            ("PLATFORM_INSTANCE".to_string(), instance.name_any()),
            ("PLATFORM_VERSION".to_string(), instance.spec.version.clone()),
            ("BROKER_URL".to_string(), broker_url(instance)),
            ("API_URL".to_string(), api_url(instance)),
            ("STORAGE_HOST".to_string(), storage_host),
            ("STORAGE_PORT".to_string(), storage_port),
            (
                "CA_URL".to_string(),
                format!("https://{}.{}.svc:8443", object_name(instance, "ca"), namespace),
            ),
        ])
    }
}

impl Component for RuntimeConfig {
    fn name(&self) -> &'static str {
        "runtime-config"
    }

    fn enabled(&self, _instance: &Platform) -> bool {
        true
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        Ok(vec![ManagedObject::reconcile(
            ResourceKind::ConfigMap,
            &generate_configmap(
                instance,
                &runtime_config_name(instance),
                "runtime-config",
                Self::data(instance),
            ),
        )?])
    }
}

/// High and default PriorityClasses for platform pods.
pub struct PriorityClasses;

impl Component for PriorityClasses {
    fn name(&self) -> &'static str {
        "priority-classes"
    }

    fn enabled(&self, instance: &Platform) -> bool {
        instance.spec.features.priority_classes
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        let [high, default] = priority_class_names(instance);
        Ok(vec![
            ManagedObject::reconcile(
                ResourceKind::PriorityClass,
                &generate_priority_class(instance, &high, HIGH_PRIORITY),
            )?,
            ManagedObject::reconcile(
                ResourceKind::PriorityClass,
                &generate_priority_class(instance, &default, DEFAULT_PRIORITY),
            )?,
        ])
    }
}

/// One-shot conversion of CA secrets written by pre-1.0 releases.
pub struct LegacyCaSecretJob;

impl LegacyCaSecretJob {
    pub fn job_name(instance: &Platform) -> String {
        object_name(instance, "ca-secret-migration")
    }
}

impl Component for LegacyCaSecretJob {
    fn name(&self) -> &'static str {
        "legacy-ca-secret-job"
    }

    fn enabled(&self, instance: &Platform) -> bool {
        instance.spec.ca.deploy
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        let job = generate_job(
            instance,
            &Self::job_name(instance),
            "certificate-authority",
            image(instance, &instance.spec.ca, "platform-ca"),
            vec![
                "convert-legacy-secrets".to_string(),
                format!("--secret={}", ca_root_secret_name(instance)),
            ],
        );
        // Job templates are immutable once created
        Ok(vec![ManagedObject::create_only(ResourceKind::Job, &job)?])
    }
}
