//! Platform Custom Resource Definition.
//!
//! A `Platform` declares one deployed platform instance: the target release,
//! which subsystems run in-cluster, and how each one is sized. The operator
//! treats the spec as read-only and reports everything it observes through
//! `PlatformStatus`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::quantity::LeafValue;

/// Platform is a custom resource describing a complete platform instance.
///
/// Example:
/// ```yaml
/// apiVersion: platformoperator.io/v1alpha1
/// kind: Platform
/// metadata:
///   name: acme
/// spec:
///   version: "2.1.0"
///   storage:
///     replicas: 3
///     resources:
///       requests:
///         memory: 4Gi
///   dashboard:
///     deploy: false
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "platformoperator.io",
    version = "v1alpha1",
    kind = "Platform",
    plural = "platforms",
    shortname = "pf",
    status = "PlatformStatus",
    namespaced,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.platformVersion"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.reconciliationPhase"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Target platform release (e.g. "2.1.0", "2.2.0-SNAPSHOT").
    pub version: String,

    /// While true the operator only refreshes health; nothing is converged.
    #[serde(default)]
    pub maintenance: bool,

    /// Registry prefix for every component image.
    #[serde(default = "default_image_registry")]
    pub image_registry: String,

    /// Externally reachable host of the public API, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_host: Option<String>,

    /// Cluster-wide feature flags.
    #[serde(default)]
    pub features: FeatureFlags,

    // === Infrastructure ===
    #[serde(default)]
    pub broker: ComponentSpec,

    #[serde(default)]
    pub storage: ComponentSpec,

    #[serde(default)]
    pub ca: ComponentSpec,

    #[serde(default)]
    pub gateway: ComponentSpec,

    // === Microservices ===
    #[serde(default)]
    pub services: MicroservicesSpec,

    // === UI ===
    #[serde(default)]
    pub dashboard: ComponentSpec,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for PlatformSpec {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            maintenance: false,
            image_registry: default_image_registry(),
            api_host: None,
            features: FeatureFlags::default(),
            broker: ComponentSpec::default(),
            storage: ComponentSpec::default(),
            ca: ComponentSpec::default(),
            gateway: ComponentSpec::default(),
            services: MicroservicesSpec::default(),
            dashboard: ComponentSpec::default(),
            labels: BTreeMap::new(),
        }
    }
}

fn default_image_registry() -> String {
    "registry.platformoperator.io".to_string()
}

/// Cluster-wide feature flags.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Create dedicated PriorityClasses for platform workloads (default: true).
    #[serde(default = "default_true")]
    pub priority_classes: bool,

    /// Run the one-shot CA secret conversion job on pre-1.0 releases (default: true).
    #[serde(default = "default_true")]
    pub legacy_ca_job: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            priority_classes: true,
            legacy_ca_job: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Desired configuration of a single subsystem.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Whether the operator runs this subsystem in-cluster (default: true).
    #[serde(default = "default_true")]
    pub deploy: bool,

    /// Number of replicas (default: 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Image tag override. Defaults to the platform version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Externally hosted endpoint, used when `deploy` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalEndpoint>,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            deploy: true,
            replicas: default_replicas(),
            image_tag: None,
            resources: ResourceRequirementsSpec::default(),
            external: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

/// Connection details of an externally hosted subsystem.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEndpoint {
    pub host: String,
    pub port: i32,
}

/// Per-microservice configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MicroservicesSpec {
    #[serde(default)]
    pub identity: ComponentSpec,
    #[serde(default)]
    pub registry: ComponentSpec,
    #[serde(default)]
    pub api: ComponentSpec,
    #[serde(default)]
    pub ingest: ComponentSpec,
    #[serde(default)]
    pub processor: ComponentSpec,
    #[serde(default)]
    pub notifier: ComponentSpec,
}

/// Resource requests and limits for a component.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default)]
    pub requests: ResourceSpec,

    #[serde(default)]
    pub limits: ResourceSpec,
}

/// CPU and memory quantities.
///
/// Older releases of the operator serialized these as bare numbers, so
/// reading accepts integers and floats as well as strings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(
        default,
        deserialize_with = "lenient_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub cpu: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory: Option<String>,
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => LeafValue::from_json(&v)
            .and_then(|leaf| leaf.canonical().ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {}", v))),
    }
}

/// Status of a Platform.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Lifecycle phase. Absent only before the first successful pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation_phase: Option<ReconciliationPhase>,

    /// Platform release believed to be live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,

    /// Version of the operator that last wrote this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    /// Aggregate health of the managed workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthLevel>,

    /// Base URL of the public API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Connection URL of the message broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,

    /// Stateful workloads keep the names of the previous operator
    /// generation so their pods bind to the existing data volumes. Set once
    /// by the legacy migration and never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_workload_names: Option<bool>,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl PlatformStatus {
    /// Current phase, treating a missing value as `Unknown`.
    pub fn phase(&self) -> ReconciliationPhase {
        self.reconciliation_phase.unwrap_or_default()
    }

    pub fn uses_legacy_workload_names(&self) -> bool {
        self.legacy_workload_names.unwrap_or(false)
    }
}

/// Lifecycle phase of a Platform.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ReconciliationPhase {
    /// No status has been written yet.
    #[default]
    Unknown,
    /// Normal convergence.
    Reconciling,
    /// A version change passed the upgrade gate and is being rolled out.
    Upgrading,
    /// Last pass converged every component.
    Reconciled,
    /// Unrecoverable configuration, e.g. an unparseable target version.
    Failed,
    /// Maintenance switch is on; only health is tracked.
    ManualMaintenance,
}

impl std::fmt::Display for ReconciliationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationPhase::Unknown => write!(f, "Unknown"),
            ReconciliationPhase::Reconciling => write!(f, "Reconciling"),
            ReconciliationPhase::Upgrading => write!(f, "Upgrading"),
            ReconciliationPhase::Reconciled => write!(f, "Reconciled"),
            ReconciliationPhase::Failed => write!(f, "Failed"),
            ReconciliationPhase::ManualMaintenance => write!(f, "ManualMaintenance"),
        }
    }
}

/// Three-level aggregate health signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
pub enum HealthLevel {
    Green,
    Yellow,
    Red,
}

impl HealthLevel {
    /// Reduce a count of failing subsystems to a level.
    pub fn from_failures(failures: usize) -> Self {
        match failures {
            0 => HealthLevel::Green,
            1 => HealthLevel::Yellow,
            _ => HealthLevel::Red,
        }
    }

    /// Numeric encoding used for metrics (0 = Green).
    pub fn as_gauge(self) -> i64 {
        match self {
            HealthLevel::Green => 0,
            HealthLevel::Yellow => 1,
            HealthLevel::Red => 2,
        }
    }
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Green => write!(f, "Green"),
            HealthLevel::Yellow => write!(f, "Yellow"),
            HealthLevel::Red => write!(f, "Red"),
        }
    }
}

/// Condition describes the state of a platform at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}
