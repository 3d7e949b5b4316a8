//! Cluster access seam.
//!
//! Everything the controller reads or writes goes through [`ClusterStore`].
//! Production uses [`KubeStore`] over a `kube::Client`; tests substitute an
//! in-memory implementation.

mod kube_store;

pub use kube_store::KubeStore;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::controller::error::Result;
use crate::controller::notifications::Notification;
use crate::crd::Platform;

/// Kinds of objects the operator manages or inspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
    Service,
    Deployment,
    StatefulSet,
    Job,
    PriorityClass,
    PersistentVolumeClaim,
    Pod,
}

impl ResourceKind {
    /// Cluster-scoped kinds ignore the namespace and cannot carry an owner
    /// reference to a namespaced Platform.
    pub fn is_cluster_scoped(self) -> bool {
        matches!(self, ResourceKind::PriorityClass)
    }

    /// `apiVersion` of the kind.
    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Secret
            | ResourceKind::ConfigMap
            | ResourceKind::Service
            | ResourceKind::PersistentVolumeClaim
            | ResourceKind::Pod => "v1",
            ResourceKind::Deployment | ResourceKind::StatefulSet => "apps/v1",
            ResourceKind::Job => "batch/v1",
            ResourceKind::PriorityClass => "scheduling.k8s.io/v1",
        }
    }

    /// Type information for a dynamic API handle.
    pub fn api_resource(self) -> ApiResource {
        match self {
            ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
            ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            ResourceKind::Job => ApiResource::erase::<Job>(&()),
            ResourceKind::PriorityClass => ApiResource::erase::<PriorityClass>(&()),
            ResourceKind::PersistentVolumeClaim => {
                ApiResource::erase::<PersistentVolumeClaim>(&())
            }
            ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happens to dependents when an object is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are garbage collected
    Background,
    /// Dependents (pods, volumes) are left in place
    Orphan,
}

/// Trait abstracting Kubernetes API operations used by the controller.
///
/// Object bodies are untyped JSON so that one convergence routine serves
/// every kind. Namespaces are ignored for cluster-scoped kinds.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a Platform instance.
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Platform>;

    /// Replace the status of a Platform.
    ///
    /// The write is conditional on `metadata.resourceVersion`; a stale
    /// version fails with a 409 Conflict API error.
    async fn replace_instance_status(&self, instance: &Platform) -> Result<Platform>;

    /// Fetch a Platform as an untyped JSON document.
    async fn get_instance_document(&self, namespace: &str, name: &str) -> Result<Value>;

    /// Replace a Platform with an untyped JSON document.
    async fn replace_instance_document(
        &self,
        namespace: &str,
        name: &str,
        document: &Value,
    ) -> Result<()>;

    /// Overwrite the finalizer list of a Platform.
    async fn set_instance_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()>;

    /// Fetch an object. Returns `None` when it does not exist.
    async fn get_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>>;

    /// Create an object from a full manifest.
    async fn create_object(&self, kind: ResourceKind, namespace: &str, body: &Value)
    -> Result<()>;

    /// Bring an existing object in line with `body`.
    async fn patch_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<()>;

    /// Delete an object. Returns `false` when it did not exist.
    async fn delete_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> Result<bool>;

    /// List the names of all objects of a kind.
    async fn list_object_names(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>>;

    /// Publish a notification about an instance. Failures are logged, never returned.
    async fn publish(&self, instance: &Platform, notification: &Notification);
}
