//! [`ClusterStore`] backed by a live API server.

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    PropagationPolicy,
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ClusterStore, Propagation, ResourceKind};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::controller::notifications::{Notification, Severity};
use crate::crd::Platform;

/// Real Kubernetes store implementation
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    /// Create a new store wrapping the given kube Client
    pub fn new(client: Client, pod_name: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: pod_name,
            },
        }
    }

    fn platforms(&self, namespace: &str) -> Api<Platform> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn platform_documents(&self, namespace: &str) -> Api<DynamicObject> {
        let ar = kube::discovery::ApiResource::erase::<Platform>(&());
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    fn objects(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.is_cluster_scoped() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Platform> {
        Ok(self.platforms(namespace).get(name).await?)
    }

    async fn replace_instance_status(&self, instance: &Platform) -> Result<Platform> {
        let name = instance.name_any();
        let namespace = instance
            .namespace()
            .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

        // resourceVersion in a merge patch makes the write conditional
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": instance.resource_version() },
            "status": instance.status,
        });

        let updated = self
            .platforms(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }

    async fn get_instance_document(&self, namespace: &str, name: &str) -> Result<Value> {
        let obj = self.platform_documents(namespace).get(name).await?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn replace_instance_document(
        &self,
        namespace: &str,
        name: &str,
        document: &Value,
    ) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(document.clone())?;
        self.platform_documents(namespace)
            .replace(name, &PostParams::default(), &obj)
            .await?;
        Ok(())
    }

    async fn set_instance_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.platforms(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        match self.objects(kind, namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        body: &Value,
    ) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(body.clone())?;
        self.objects(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        debug!(kind = %kind, name = %obj.name_any(), "Created object");
        Ok(())
    }

    async fn patch_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<()> {
        self.objects(kind, namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(body),
            )
            .await?;
        debug!(kind = %kind, name = %name, "Patched object");
        Ok(())
    }

    async fn delete_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> Result<bool> {
        let params = DeleteParams {
            propagation_policy: Some(match propagation {
                Propagation::Background => PropagationPolicy::Background,
                Propagation::Orphan => PropagationPolicy::Orphan,
            }),
            ..Default::default()
        };
        match self.objects(kind, namespace).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_object_names(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
        let list = self
            .objects(kind, namespace)
            .list_metadata(&ListParams::default())
            .await?;
        Ok(list.items.iter().map(|o| o.name_any()).collect())
    }

    async fn publish(&self, instance: &Platform, notification: &Notification) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let object_ref = instance.object_ref(&());
        let type_ = match notification.severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        };
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: notification.reason.to_string(),
                    note: Some(notification.message.clone()),
                    action: notification.reason.action().into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %notification.reason, error = %e, "Failed to publish event");
        }
    }
}
