//! Workload manifest generation.
//!
//! Component templates are intentionally small: one container, one port and
//! an optional data claim. Stateful subsystems get a StatefulSet with a
//! volume claim template, stateless ones a Deployment. Both get a ClusterIP
//! Service, normally with the workload's name.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements, Secret, SecurityContext, Service, ServicePort,
    ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::Platform;
use crate::resources::common::{
    INSTANCE_LABEL, INSTANCE_NAMESPACE_LABEL, MANAGED_BY, instance_namespace, object_name,
    selector_labels, standard_labels,
};

/// Default size of a data claim
const DEFAULT_CLAIM_SIZE: &str = "10Gi";
/// Mount path of the data claim
const DATA_MOUNT_PATH: &str = "/var/lib/platform";
/// Non-root user of all platform images
const PLATFORM_USER_ID: i64 = 1000;

/// Everything needed to render one workload and its Service.
#[derive(Clone, Debug)]
pub struct WorkloadTemplate {
    /// Component label value (e.g. "broker")
    pub component: &'static str,
    /// Workload name
    pub name: String,
    /// Service name; differs from the workload name for migrated instances
    pub service_name: String,
    pub image: String,
    pub port: i32,
    pub replicas: i32,
    pub resources: Option<ResourceRequirements>,
    /// Volume claim template name, stateful workloads only
    pub data_claim: Option<&'static str>,
    pub priority_class: Option<String>,
}

/// Name of the shared runtime ConfigMap
pub fn runtime_config_name(instance: &Platform) -> String {
    object_name(instance, "runtime-config")
}

fn metadata(instance: &Platform, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(standard_labels(instance, component)),
        ..Default::default()
    }
}

fn container(instance: &Platform, template: &WorkloadTemplate) -> Container {
    Container {
        name: template.component.to_string(),
        image: Some(template.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: template.port,
            name: Some("main".to_string()),
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: runtime_config_name(instance),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        resources: template.resources.clone(),
        volume_mounts: template.data_claim.map(|claim| {
            vec![VolumeMount {
                name: claim.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                ..Default::default()
            }]
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_template(instance: &Platform, template: &WorkloadTemplate) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(instance, template.component)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container(instance, template)],
            priority_class_name: template.priority_class.clone(),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(PLATFORM_USER_ID),
                fs_group: Some(PLATFORM_USER_ID),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Generate a StatefulSet with a data volume claim template.
pub fn generate_statefulset(instance: &Platform, template: &WorkloadTemplate) -> StatefulSet {
    StatefulSet {
        metadata: metadata(instance, &template.name, template.component),
        spec: Some(StatefulSetSpec {
            replicas: Some(template.replicas),
            service_name: Some(template.service_name.clone()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(instance, template.component)),
                ..Default::default()
            },
            template: pod_template(instance, template),
            volume_claim_templates: template.data_claim.map(|claim| {
                vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some(claim.to_string()),
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        resources: Some(VolumeResourceRequirements {
                            requests: Some(BTreeMap::from([(
                                "storage".to_string(),
                                Quantity(DEFAULT_CLAIM_SIZE.to_string()),
                            )])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate a Deployment for a stateless component.
pub fn generate_deployment(instance: &Platform, template: &WorkloadTemplate) -> Deployment {
    Deployment {
        metadata: metadata(instance, &template.name, template.component),
        spec: Some(DeploymentSpec {
            replicas: Some(template.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(instance, template.component)),
                ..Default::default()
            },
            template: pod_template(instance, template),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the ClusterIP Service in front of a workload.
pub fn generate_service(instance: &Platform, template: &WorkloadTemplate) -> Service {
    Service {
        metadata: metadata(instance, &template.service_name, template.component),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(instance, template.component)),
            ports: Some(vec![ServicePort {
                name: Some("main".to_string()),
                port: template.port,
                target_port: Some(IntOrString::Int(template.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate a ConfigMap.
pub fn generate_configmap(
    instance: &Platform,
    name: &str,
    component: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: metadata(instance, name, component),
        data: Some(data),
        ..Default::default()
    }
}

/// Generate an Opaque Secret from plain-text values.
pub fn generate_secret(
    instance: &Platform,
    name: &str,
    component: &str,
    values: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: metadata(instance, name, component),
        type_: Some("Opaque".to_string()),
        string_data: Some(values),
        ..Default::default()
    }
}

/// Generate a run-once Job.
pub fn generate_job(
    instance: &Platform,
    name: &str,
    component: &'static str,
    image: String,
    args: Vec<String>,
) -> Job {
    let template = WorkloadTemplate {
        component,
        name: name.to_string(),
        service_name: name.to_string(),
        image,
        port: 0,
        replicas: 1,
        resources: None,
        data_claim: None,
        priority_class: None,
    };
    let mut pod = pod_template(instance, &template);
    if let Some(spec) = pod.spec.as_mut() {
        spec.restart_policy = Some("OnFailure".to_string());
        for c in &mut spec.containers {
            c.ports = None;
            c.args = Some(args.clone());
        }
    }

    Job {
        metadata: metadata(instance, name, component),
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            template: pod,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate a cluster-scoped PriorityClass.
///
/// Carries instance labels instead of an owner reference.
pub fn generate_priority_class(instance: &Platform, name: &str, value: i32) -> PriorityClass {
    let labels = BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
        (INSTANCE_LABEL.to_string(), instance.name_any()),
        (INSTANCE_NAMESPACE_LABEL.to_string(), instance_namespace(instance)),
    ]);
    PriorityClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        value,
        global_default: Some(false),
        description: Some(format!("Platform {} workloads", instance.name_any())),
        ..Default::default()
    }
}
