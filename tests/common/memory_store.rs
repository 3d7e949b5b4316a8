//! In-memory `ClusterStore` for tests that run without a cluster.
//!
//! Objects are kept as JSON documents keyed by kind, namespace and name.
//! Platform writes carry a resource version so stale status writes fail
//! with 409 Conflict the way the API server does. Failures can be injected
//! per operation and object.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use platform_operator::controller::error::{Error, Result};
use platform_operator::controller::notifications::{Notification, NotificationReason};
use platform_operator::crd::{Platform, PlatformStatus};
use platform_operator::store::{ClusterStore, Propagation, ResourceKind};

type ObjectKey = (ResourceKind, String, String);

/// A write recorded by the store, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Created(ResourceKind, String),
    Patched(ResourceKind, String),
    Deleted(ResourceKind, String, Propagation),
}

#[derive(Default)]
struct Inner {
    instances: BTreeMap<(String, String), Value>,
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    writes: Vec<Write>,
    status_history: Vec<PlatformStatus>,
    notifications: Vec<Notification>,
    failing_gets: BTreeSet<(ResourceKind, String)>,
    failing_creates: BTreeSet<(ResourceKind, String)>,
    failing_deletes: BTreeSet<(ResourceKind, String)>,
    failing_lists: BTreeSet<ResourceKind>,
    conflicts_remaining: u32,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-memory cluster used by functional tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

/// Build a Kubernetes API error with the given status code.
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {}", reason),
        reason: reason.to_string(),
        code,
    }))
}

fn scoped_namespace(kind: ResourceKind, namespace: &str) -> String {
    if kind.is_cluster_scoped() {
        String::new()
    } else {
        namespace.to_string()
    }
}

/// JSON merge: objects merge recursively, everything else is replaced.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // === Seeding ===

    /// Store a Platform, assigning it a resource version.
    pub fn insert_instance(&self, instance: &Platform) {
        self.insert_instance_document(serde_json::to_value(instance).unwrap());
    }

    /// Store a raw Platform document (for legacy shapes typed access rejects).
    pub fn insert_instance_document(&self, mut document: Value) {
        let mut inner = self.lock();
        let version = inner.next_version();
        document["metadata"]["resourceVersion"] = json!(version);
        let namespace = document["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        let name = document["metadata"]["name"].as_str().unwrap().to_string();
        inner.instances.insert((namespace, name), document);
    }

    /// Store an object directly, bypassing the write log.
    pub fn insert_object(&self, kind: ResourceKind, namespace: &str, body: Value) {
        let name = body["metadata"]["name"].as_str().unwrap().to_string();
        self.lock()
            .objects
            .insert((kind, scoped_namespace(kind, namespace), name), body);
    }

    // === Failure injection ===

    pub fn fail_get(&self, kind: ResourceKind, name: &str) {
        self.lock().failing_gets.insert((kind, name.to_string()));
    }

    pub fn fail_create(&self, kind: ResourceKind, name: &str) {
        self.lock().failing_creates.insert((kind, name.to_string()));
    }

    pub fn fail_delete(&self, kind: ResourceKind, name: &str) {
        self.lock().failing_deletes.insert((kind, name.to_string()));
    }

    pub fn fail_list(&self, kind: ResourceKind) {
        self.lock().failing_lists.insert(kind);
    }

    /// Make the next `count` status writes fail with 409 Conflict, as if a
    /// concurrent writer got there first.
    pub fn conflict_next_status_writes(&self, count: u32) {
        self.lock().conflicts_remaining = count;
    }

    // === Simulated cluster behavior ===

    /// Set ready replicas of a workload to its desired count (or zero).
    pub fn set_ready(&self, kind: ResourceKind, namespace: &str, name: &str, ready: bool) {
        let mut inner = self.lock();
        let key = (kind, scoped_namespace(kind, namespace), name.to_string());
        let object = inner.objects.get_mut(&key).unwrap();
        let desired = object
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        object["status"] = json!({ "readyReplicas": if ready { desired } else { 0 } });
    }

    /// Mark every StatefulSet and Deployment as fully ready.
    pub fn mark_all_ready(&self) {
        let mut inner = self.lock();
        for ((kind, _, _), object) in inner.objects.iter_mut() {
            if matches!(kind, ResourceKind::StatefulSet | ResourceKind::Deployment) {
                let desired = object
                    .pointer("/spec/replicas")
                    .and_then(Value::as_i64)
                    .unwrap_or(1);
                object["status"] = json!({ "readyReplicas": desired });
            }
        }
    }

    // === Inspection ===

    pub fn instance(&self, namespace: &str, name: &str) -> Platform {
        let inner = self.lock();
        let document = inner
            .instances
            .get(&(namespace.to_string(), name.to_string()))
            .unwrap()
            .clone();
        serde_json::from_value(document).unwrap()
    }

    pub fn instance_document(&self, namespace: &str, name: &str) -> Value {
        self.lock()
            .instances
            .get(&(namespace.to_string(), name.to_string()))
            .unwrap()
            .clone()
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&(kind, scoped_namespace(kind, namespace), name.to_string()))
            .cloned()
    }

    pub fn object_names(&self, kind: ResourceKind) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Every status successfully written, in order.
    pub fn status_history(&self) -> Vec<PlatformStatus> {
        self.lock().status_history.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    pub fn notification_reasons(&self) -> Vec<NotificationReason> {
        self.lock().notifications.iter().map(|n| n.reason).collect()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Platform> {
        let document = self.get_instance_document(namespace, name).await?;
        Ok(serde_json::from_value(document)?)
    }

    async fn replace_instance_status(&self, instance: &Platform) -> Result<Platform> {
        let mut inner = self.lock();
        let namespace = instance.metadata.namespace.clone().unwrap_or_default();
        let name = instance.metadata.name.clone().unwrap_or_default();
        let key = (namespace, name);

        if inner.conflicts_remaining > 0 {
            inner.conflicts_remaining -= 1;
            let version = inner.next_version();
            if let Some(document) = inner.instances.get_mut(&key) {
                document["metadata"]["resourceVersion"] = json!(version);
            }
            return Err(api_error(409, "Conflict"));
        }

        let version = inner.next_version();
        let document = inner
            .instances
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if document["metadata"]["resourceVersion"].as_str()
            != instance.metadata.resource_version.as_deref()
        {
            return Err(api_error(409, "Conflict"));
        }

        let status = instance.status.clone().unwrap_or_default();
        document["status"] = serde_json::to_value(&status)?;
        document["metadata"]["resourceVersion"] = json!(version);
        let updated: Platform = serde_json::from_value(document.clone())?;
        inner.status_history.push(status);
        Ok(updated)
    }

    async fn get_instance_document(&self, namespace: &str, name: &str) -> Result<Value> {
        self.lock()
            .instances
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn replace_instance_document(
        &self,
        namespace: &str,
        name: &str,
        document: &Value,
    ) -> Result<()> {
        let mut inner = self.lock();
        let version = inner.next_version();
        let key = (namespace.to_string(), name.to_string());
        if !inner.instances.contains_key(&key) {
            return Err(api_error(404, "NotFound"));
        }
        let mut document = document.clone();
        document["metadata"]["resourceVersion"] = json!(version);
        inner.instances.insert(key, document);
        Ok(())
    }

    async fn set_instance_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()> {
        let mut inner = self.lock();
        let version = inner.next_version();
        let document = inner
            .instances
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        document["metadata"]["finalizers"] = json!(finalizers);
        document["metadata"]["resourceVersion"] = json!(version);
        Ok(())
    }

    async fn get_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let inner = self.lock();
        if inner.failing_gets.contains(&(kind, name.to_string())) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(inner
            .objects
            .get(&(kind, scoped_namespace(kind, namespace), name.to_string()))
            .cloned())
    }

    async fn create_object(&self, kind: ResourceKind, namespace: &str, body: &Value) -> Result<()> {
        let mut inner = self.lock();
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| api_error(422, "Invalid"))?
            .to_string();
        if inner.failing_creates.contains(&(kind, name.clone())) {
            return Err(api_error(500, "InternalError"));
        }
        let key = (kind, scoped_namespace(kind, namespace), name.clone());
        if inner.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        inner.objects.insert(key, body.clone());
        inner.writes.push(Write::Created(kind, name));
        Ok(())
    }

    async fn patch_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<()> {
        let mut inner = self.lock();
        let key = (kind, scoped_namespace(kind, namespace), name.to_string());
        let existing = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        merge(existing, body);
        inner.writes.push(Write::Patched(kind, name.to_string()));
        Ok(())
    }

    async fn delete_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if inner.failing_deletes.contains(&(kind, name.to_string())) {
            return Err(api_error(500, "InternalError"));
        }
        let key = (kind, scoped_namespace(kind, namespace), name.to_string());
        let existed = inner.objects.remove(&key).is_some();
        if existed {
            inner
                .writes
                .push(Write::Deleted(kind, name.to_string(), propagation));
        }
        Ok(existed)
    }

    async fn list_object_names(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
        let inner = self.lock();
        if inner.failing_lists.contains(&kind) {
            return Err(api_error(500, "InternalError"));
        }
        let namespace = scoped_namespace(kind, namespace);
        Ok(inner
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && *ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect())
    }

    async fn publish(&self, _instance: &Platform, notification: &Notification) {
        self.lock().notifications.push(notification.clone());
    }
}
