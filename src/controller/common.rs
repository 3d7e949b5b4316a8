//! Shared controller helpers.

use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::Platform;
use crate::resources::common::instance_namespace;
use crate::store::ClusterStore;

/// Add a finalizer to a Platform. No-op when already present.
pub async fn add_finalizer<S>(store: &S, instance: &Platform, finalizer: &str) -> Result<()>
where
    S: ClusterStore + ?Sized,
{
    let mut finalizers = instance.finalizers().to_vec();

    // Only add if not already present
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
        store
            .set_instance_finalizers(&instance_namespace(instance), &instance.name_any(), &finalizers)
            .await?;
    }
    Ok(())
}

/// Remove a finalizer from a Platform. A Platform that is already gone is not an error.
pub async fn remove_finalizer<S>(store: &S, instance: &Platform, finalizer: &str) -> Result<()>
where
    S: ClusterStore + ?Sized,
{
    let namespace = instance_namespace(instance);
    let name = instance.name_any();

    // Read the latest finalizer list so other controllers' entries survive
    let current = match store.get_instance(&namespace, &name).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut finalizers = current.finalizers().to_vec();
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);
        store
            .set_instance_finalizers(&namespace, &name, &finalizers)
            .await?;
    }
    Ok(())
}
