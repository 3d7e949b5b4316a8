//! Cleanup on Platform deletion.
//!
//! Owned workloads are garbage collected through their owner references.
//! What is left is removed here: the CA root secret, the cluster-scoped
//! PriorityClasses and the data volumes StatefulSets leave behind. Only
//! volumes of this instance's StatefulSets are touched, under both the
//! current and the legacy StatefulSet names.

use kube::ResourceExt;
use tracing::{info, warn};

use crate::components::StatefulComponent;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::Platform;
use crate::resources::common::{ca_root_secret_name, instance_namespace, priority_class_names};
use crate::store::{ClusterStore, Propagation, ResourceKind};

/// Finalizer name for Platform resources
pub const FINALIZER: &str = "platformoperator.io/finalizer";

/// What a finalization removed and what it could not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub ca_secret_deleted: bool,
    pub priority_classes_deleted: usize,
    pub volumes_deleted: Vec<String>,
    /// `(object name, error)` for every best-effort deletion that failed
    pub failures: Vec<(String, String)>,
}

impl FinalizeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Whether a volume claim was created from one of this instance's claim
/// templates (`<claim>-<statefulset>-<ordinal>`).
pub fn is_platform_volume(instance: &Platform, name: &str) -> bool {
    StatefulComponent::ALL
        .iter()
        .flat_map(|component| component.volume_prefixes(instance))
        .any(|prefix| {
            name.strip_prefix(prefix.as_str()).is_some_and(|ordinal| {
                !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit())
            })
        })
}

/// Remove everything owner references do not cover.
///
/// Individual deletions are best-effort and collected in the report. Only a
/// failure to list volume claims is returned as an error.
pub async fn finalize<S: ClusterStore>(ctx: &Context<S>, instance: &Platform) -> Result<FinalizeReport> {
    let name = instance.name_any();
    let namespace = instance_namespace(instance);
    let mut report = FinalizeReport::default();

    let secret = ca_root_secret_name(instance);
    match ctx
        .store
        .delete_object(ResourceKind::Secret, &namespace, &secret, Propagation::Background)
        .await
    {
        Ok(deleted) => report.ca_secret_deleted = deleted,
        Err(e) => {
            warn!(instance = %name, secret = %secret, error = %e, "Failed to delete CA root secret");
            report.failures.push((secret, e.to_string()));
        }
    }

    for class in priority_class_names(instance) {
        match ctx
            .store
            .delete_object(ResourceKind::PriorityClass, &namespace, &class, Propagation::Background)
            .await
        {
            Ok(true) => report.priority_classes_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(instance = %name, priority_class = %class, error = %e, "Failed to delete PriorityClass");
                report.failures.push((class, e.to_string()));
            }
        }
    }

    let claims = ctx
        .store
        .list_object_names(ResourceKind::PersistentVolumeClaim, &namespace)
        .await?;

    for claim in claims.into_iter().filter(|c| is_platform_volume(instance, c)) {
        match ctx
            .store
            .delete_object(
                ResourceKind::PersistentVolumeClaim,
                &namespace,
                &claim,
                Propagation::Background,
            )
            .await
        {
            Ok(_) => report.volumes_deleted.push(claim),
            Err(e) => {
                warn!(instance = %name, volume = %claim, error = %e, "Failed to delete volume claim");
                report.failures.push((claim, e.to_string()));
            }
        }
    }

    info!(
        instance = %name,
        volumes = report.volumes_deleted.len(),
        failures = report.failures.len(),
        "Finalized platform"
    );
    Ok(report)
}
