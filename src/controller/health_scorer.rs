//! Aggregate health scoring.
//!
//! Each enabled subsystem contributes at most one readiness sample. A
//! subsystem counts as failing when its workload cannot be fetched, does
//! not exist, or wants replicas but has none ready. The failure count maps
//! to a [`HealthLevel`]: 0 is Green, 1 is Yellow, 2 or more is Red.

use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::components::ComponentId;
use crate::crd::{HealthLevel, Platform};
use crate::resources::common::instance_namespace;
use crate::store::ClusterStore;

/// Readiness of one subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Replicas are wanted but none are ready
    NotReady,
    /// The workload does not exist
    Missing,
    /// The workload could not be fetched
    Unreachable,
}

impl Readiness {
    pub fn is_failing(self) -> bool {
        !matches!(self, Readiness::Ready)
    }
}

/// One readiness observation. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSample {
    pub component: &'static str,
    pub readiness: Readiness,
}

/// Reduce samples to a health level.
pub fn score(samples: &[WorkloadSample]) -> HealthLevel {
    HealthLevel::from_failures(samples.iter().filter(|s| s.readiness.is_failing()).count())
}

/// Readiness of a fetched StatefulSet or Deployment.
///
/// Desired replicas default to 1 and ready replicas to 0 when unset.
pub fn readiness_of(workload: &Value) -> Readiness {
    let desired = workload
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let ready = workload
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if desired >= 1 && ready == 0 {
        Readiness::NotReady
    } else {
        Readiness::Ready
    }
}

/// Sample every enabled subsystem of an instance.
pub async fn sample<S>(store: &S, instance: &Platform) -> Vec<WorkloadSample>
where
    S: ClusterStore + ?Sized,
{
    let namespace = instance_namespace(instance);
    let mut samples = Vec::new();

    for id in ComponentId::ALL {
        let component = id.component();
        if !component.enabled(instance) {
            continue;
        }
        let Some(workload) = component.workload(instance) else {
            continue;
        };

        let readiness = match store.get_object(workload.kind, &namespace, &workload.name).await {
            Ok(Some(obj)) => readiness_of(&obj),
            Ok(None) => Readiness::Missing,
            Err(e) => {
                warn!(
                    instance = %instance.name_any(),
                    workload = %workload.name,
                    error = %e,
                    "Failed to fetch workload for health check"
                );
                Readiness::Unreachable
            }
        };

        samples.push(WorkloadSample {
            component: component.name(),
            readiness,
        });
    }

    samples
}

/// Compute the aggregate health of an instance. Pure read.
pub async fn compute_health<S>(store: &S, instance: &Platform) -> HealthLevel
where
    S: ClusterStore + ?Sized,
{
    let samples = sample(store, instance).await;
    let health = score(&samples);
    debug!(
        instance = %instance.name_any(),
        sampled = samples.len(),
        failing = samples.iter().filter(|s| s.readiness.is_failing()).count(),
        health = %health,
        "Computed health"
    );
    health
}
