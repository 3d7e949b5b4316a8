//! Resource convergence primitive.
//!
//! `converge` brings one desired object into existence or in line with its
//! desired body: create when absent, patch only when the live object does
//! not already contain every desired field. Fields the API server adds
//! (defaults, status, uid) never cause a patch.

use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::crd::Platform;
use crate::resources::common::{instance_namespace, owner_reference};
use crate::store::{ClusterStore, Propagation, ResourceKind};

/// How an existing object is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeMode {
    /// Keep the live object in line with the desired body
    Reconcile,
    /// Create when absent, never touch afterwards (generated key material)
    CreateOnly,
}

/// A desired object produced by a component.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObject {
    pub kind: ResourceKind,
    pub name: String,
    pub body: Value,
    pub mode: ConvergeMode,
}

impl ManagedObject {
    /// Build a reconciled object from any serializable manifest.
    pub fn reconcile<T: serde::Serialize>(kind: ResourceKind, manifest: &T) -> Result<Self> {
        Self::build(kind, manifest, ConvergeMode::Reconcile)
    }

    /// Build a create-only object from any serializable manifest.
    pub fn create_only<T: serde::Serialize>(kind: ResourceKind, manifest: &T) -> Result<Self> {
        Self::build(kind, manifest, ConvergeMode::CreateOnly)
    }

    fn build<T: serde::Serialize>(kind: ResourceKind, manifest: &T, mode: ConvergeMode) -> Result<Self> {
        let body = serde_json::to_value(manifest)?;
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingField(format!("{} metadata.name", kind)))?
            .to_string();
        Ok(Self {
            kind,
            name,
            body,
            mode,
        })
    }
}

/// Result of a single convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Converge one object owned by `owner`.
pub async fn converge<S>(store: &S, owner: &Platform, object: &ManagedObject) -> Result<ConvergeOutcome>
where
    S: ClusterStore + ?Sized,
{
    let namespace = instance_namespace(owner);
    let desired = with_ownership(owner, object)?;

    match store.get_object(object.kind, &namespace, &object.name).await? {
        None => {
            store.create_object(object.kind, &namespace, &desired).await?;
            info!(kind = %object.kind, name = %object.name, instance = %owner.name_any(), "Created object");
            Ok(ConvergeOutcome::Created)
        }
        Some(_) if object.mode == ConvergeMode::CreateOnly => Ok(ConvergeOutcome::Unchanged),
        Some(existing) if contains(&desired, &existing) => Ok(ConvergeOutcome::Unchanged),
        Some(_) => {
            store
                .patch_object(object.kind, &namespace, &object.name, &desired)
                .await?;
            info!(kind = %object.kind, name = %object.name, instance = %owner.name_any(), "Updated object");
            Ok(ConvergeOutcome::Updated)
        }
    }
}

/// Remove an object. Absence counts as success; returns whether it existed.
pub async fn remove<S>(store: &S, owner: &Platform, kind: ResourceKind, name: &str) -> Result<bool>
where
    S: ClusterStore + ?Sized,
{
    let namespace = instance_namespace(owner);
    let existed = store
        .delete_object(kind, &namespace, name, Propagation::Background)
        .await?;
    if existed {
        info!(kind = %kind, name = %name, instance = %owner.name_any(), "Removed object");
    } else {
        debug!(kind = %kind, name = %name, "Object already absent");
    }
    Ok(existed)
}

/// Attach namespace and owner reference unless the kind is cluster-scoped.
fn with_ownership(owner: &Platform, object: &ManagedObject) -> Result<Value> {
    let mut body = object.body.clone();
    if object.kind.is_cluster_scoped() {
        return Ok(body);
    }

    let metadata = body
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| Error::MissingField(format!("{} {} metadata", object.kind, object.name)))?;
    metadata.insert(
        "namespace".to_string(),
        Value::String(instance_namespace(owner)),
    );
    metadata.insert(
        "ownerReferences".to_string(),
        serde_json::to_value(vec![owner_reference(owner)])?,
    );
    Ok(body)
}

/// Recursive JSON containment: every field of `desired` is present in
/// `existing` with an equal value. Arrays must match element-wise.
pub fn contains(desired: &Value, existing: &Value) -> bool {
    match (desired, existing) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|v| contains(value, v))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| contains(w, h))
        }
        (want, have) => want == have,
    }
}
