//! Workload-backed components: stateful infrastructure and stateless services.

use crate::controller::error::Result;
use crate::crd::{ComponentSpec, Platform, PlatformSpec};
use crate::resources::common::{image, object_name, priority_class_names, resource_requirements};
use crate::resources::converge::ManagedObject;
use crate::resources::workloads::{
    WorkloadTemplate, generate_deployment, generate_service, generate_statefulset,
};
use crate::store::ResourceKind;

use super::{Component, Workload};

type SpecSelector = fn(&PlatformSpec) -> &ComponentSpec;

/// A StatefulSet-backed subsystem with one data claim.
///
/// Data volumes are named `<data_claim>-<statefulset>-<ordinal>`, so the
/// StatefulSet name decides which volumes a pod binds to.
#[derive(Clone, Copy)]
pub struct StatefulComponent {
    pub name: &'static str,
    /// Object name suffix (`<instance>-<suffix>`)
    pub suffix: &'static str,
    /// StatefulSet name suffix used by the previous operator generation
    pub legacy_suffix: &'static str,
    pub image: &'static str,
    pub port: i32,
    pub data_claim: &'static str,
    spec: SpecSelector,
}

fn broker(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.broker
}
fn storage(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.storage
}
fn ca(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.ca
}
fn gateway(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.gateway
}

impl StatefulComponent {
    pub const BROKER: Self = Self {
        name: "broker",
        suffix: "broker",
        legacy_suffix: "mq",
        image: "platform-broker",
        port: 5672,
        data_claim: "broker-data",
        spec: broker,
    };

    pub const STORAGE: Self = Self {
        name: "storage",
        suffix: "storage",
        legacy_suffix: "db",
        image: "platform-storage",
        port: 9042,
        data_claim: "storage-data",
        spec: storage,
    };

    pub const CERTIFICATE_AUTHORITY: Self = Self {
        name: "certificate-authority",
        suffix: "ca",
        legacy_suffix: "certs",
        image: "platform-ca",
        port: 8443,
        data_claim: "ca-data",
        spec: ca,
    };

    pub const BROKER_GATEWAY: Self = Self {
        name: "broker-gateway",
        suffix: "broker-gateway",
        legacy_suffix: "gw",
        image: "platform-broker-gateway",
        port: 8883,
        data_claim: "gateway-data",
        spec: gateway,
    };

    /// Every stateful subsystem.
    pub const ALL: [Self; 4] = [
        Self::BROKER,
        Self::STORAGE,
        Self::CERTIFICATE_AUTHORITY,
        Self::BROKER_GATEWAY,
    ];

    /// StatefulSet name, which keeps the legacy name on migrated instances.
    pub fn workload_name(&self, instance: &Platform) -> String {
        let migrated = instance
            .status
            .as_ref()
            .is_some_and(|s| s.uses_legacy_workload_names());
        if migrated {
            self.legacy_workload_name(instance)
        } else {
            object_name(instance, self.suffix)
        }
    }

    pub fn legacy_workload_name(&self, instance: &Platform) -> String {
        object_name(instance, self.legacy_suffix)
    }

    /// Prefixes of the data volumes this subsystem may own, under both the
    /// current and the legacy StatefulSet name.
    pub fn volume_prefixes(&self, instance: &Platform) -> [String; 2] {
        [
            format!("{}-{}-", self.data_claim, object_name(instance, self.suffix)),
            format!("{}-{}-", self.data_claim, self.legacy_workload_name(instance)),
        ]
    }

    fn template(&self, instance: &Platform) -> WorkloadTemplate {
        let spec = (self.spec)(&instance.spec);
        WorkloadTemplate {
            component: self.name,
            name: self.workload_name(instance),
            service_name: object_name(instance, self.suffix),
            image: image(instance, spec, self.image),
            port: self.port,
            replicas: spec.replicas,
            resources: resource_requirements(spec),
            data_claim: Some(self.data_claim),
            priority_class: instance.spec.features.priority_classes.then(|| {
                let [high, _] = priority_class_names(instance);
                high
            }),
        }
    }
}

impl Component for StatefulComponent {
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self, instance: &Platform) -> bool {
        (self.spec)(&instance.spec).deploy
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        let template = self.template(instance);
        Ok(vec![
            ManagedObject::reconcile(
                ResourceKind::StatefulSet,
                &generate_statefulset(instance, &template),
            )?,
            ManagedObject::reconcile(ResourceKind::Service, &generate_service(instance, &template))?,
        ])
    }

    fn workload(&self, instance: &Platform) -> Option<Workload> {
        Some(Workload {
            kind: ResourceKind::StatefulSet,
            name: self.workload_name(instance),
        })
    }
}

/// A Deployment-backed stateless subsystem.
#[derive(Clone, Copy)]
pub struct StatelessComponent {
    pub name: &'static str,
    pub port: i32,
    spec: SpecSelector,
}

fn identity(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.identity
}
fn registry(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.registry
}
fn api(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.api
}
fn ingest(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.ingest
}
fn processor(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.processor
}
fn notifier(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.services.notifier
}
fn dashboard(spec: &PlatformSpec) -> &ComponentSpec {
    &spec.dashboard
}

impl StatelessComponent {
    pub const IDENTITY: Self = Self::new("identity", 8081, identity);
    pub const REGISTRY: Self = Self::new("registry", 8082, registry);
    pub const API: Self = Self::new("api", 8080, api);
    pub const INGEST: Self = Self::new("ingest", 8083, ingest);
    pub const PROCESSOR: Self = Self::new("processor", 8084, processor);
    pub const NOTIFIER: Self = Self::new("notifier", 8085, notifier);
    pub const DASHBOARD: Self = Self::new("dashboard", 3000, dashboard);

    const fn new(name: &'static str, port: i32, spec: SpecSelector) -> Self {
        Self { name, port, spec }
    }

    fn template(&self, instance: &Platform) -> WorkloadTemplate {
        let spec = (self.spec)(&instance.spec);
        WorkloadTemplate {
            component: self.name,
            name: object_name(instance, self.name),
            service_name: object_name(instance, self.name),
            image: image(instance, spec, &format!("platform-{}", self.name)),
            port: self.port,
            replicas: spec.replicas,
            resources: resource_requirements(spec),
            data_claim: None,
            priority_class: instance.spec.features.priority_classes.then(|| {
                let [_, default] = priority_class_names(instance);
                default
            }),
        }
    }
}

impl Component for StatelessComponent {
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self, instance: &Platform) -> bool {
        (self.spec)(&instance.spec).deploy
    }

    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>> {
        let template = self.template(instance);
        Ok(vec![
            ManagedObject::reconcile(
                ResourceKind::Deployment,
                &generate_deployment(instance, &template),
            )?,
            ManagedObject::reconcile(ResourceKind::Service, &generate_service(instance, &template))?,
        ])
    }

    fn workload(&self, instance: &Platform) -> Option<Workload> {
        Some(Workload {
            kind: ResourceKind::Deployment,
            name: object_name(instance, self.name),
        })
    }
}
