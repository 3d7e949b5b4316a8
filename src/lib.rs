//! platform-operator library crate
//!
//! This module exports the controller, the Platform CRD, the component
//! catalog, the cluster store abstraction and the resource generators.

pub mod components;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod leadership;
pub mod quantity;
pub mod resources;
pub mod retry;
pub mod store;
pub mod version;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::Platform;
use store::KubeStore;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watches.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the Platform controller.
///
/// Watches Platform resources in `config.namespace` (or cluster-wide when
/// unset) and reconciles them. Runs until the watch stream ends, which does
/// not happen in normal operation.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.namespace.clone();
    let scope = namespace.as_deref();
    info!(
        "Starting controller for Platform resources (scope: {})",
        scope.unwrap_or("cluster-wide")
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let store = KubeStore::new(client.clone(), config.pod_name.clone());
    let ctx = Arc::new(Context::new(store, config.clone(), health_state));

    let platforms: Api<Platform> = scoped_api(client.clone(), scope);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), scope);
    let deployments: Api<Deployment> = scoped_api(client.clone(), scope);
    let services: Api<Service> = scoped_api(client.clone(), scope);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), scope);

    let watcher_config = default_watcher_config();
    let (reader, platform_stream) = create_filtered_stream(platforms, watcher_config.clone());

    // Workloads are watched in full since health reads their ready replicas.
    // Services and ConfigMaps only need to trigger a pass, so metadata is enough.
    Controller::for_stream(platform_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for owned objects can still arrive after the
                    // Platform itself was deleted.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
