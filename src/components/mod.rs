//! Component reconcilers.
//!
//! Each subsystem of a platform is a [`Component`]: it renders its desired
//! objects and says whether it is enabled. [`ensure`] converges the objects
//! of an enabled component and removes those of a disabled one.
//!
//! | Component | Objects | Workload |
//! |-----------|---------|----------|
//! | credentials | create-only Secrets | - |
//! | runtime-config | ConfigMap | - |
//! | priority-classes | 2 PriorityClasses | - |
//! | broker, storage, certificate-authority, broker-gateway | StatefulSet + Service | StatefulSet |
//! | legacy-ca-secret-job | Job | - |
//! | identity, registry, api, ingest, processor, notifier, dashboard | Deployment + Service | Deployment |

mod support;
mod workload;

pub use support::{Credentials, LegacyCaSecretJob, PriorityClasses, RuntimeConfig};
pub use workload::{StatefulComponent, StatelessComponent};

use std::fmt;

use tracing::debug;

use crate::controller::error::Result;
use crate::crd::Platform;
use crate::resources::converge::{ConvergeOutcome, ManagedObject, converge, remove};
use crate::store::{ClusterStore, ResourceKind};

/// A readiness-queryable workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub kind: ResourceKind,
    pub name: String,
}

/// A subsystem the sequencer can converge.
pub trait Component: Send + Sync {
    /// Stable component name used in logs and plans.
    fn name(&self) -> &'static str;

    /// Whether the component should exist for this instance.
    fn enabled(&self, instance: &Platform) -> bool;

    /// Desired objects, rendered whether or not the component is enabled.
    fn objects(&self, instance: &Platform) -> Result<Vec<ManagedObject>>;

    /// Workload whose readiness represents this component, if any.
    fn workload(&self, _instance: &Platform) -> Option<Workload> {
        None
    }
}

/// Converge an enabled component, remove a disabled one.
///
/// Returns whether anything was created, updated or removed.
pub async fn ensure<S>(store: &S, instance: &Platform, component: &dyn Component) -> Result<bool>
where
    S: ClusterStore + ?Sized,
{
    let objects = component.objects(instance)?;
    let mut changed = false;

    if component.enabled(instance) {
        for object in &objects {
            let outcome = converge(store, instance, object).await?;
            changed |= outcome != ConvergeOutcome::Unchanged;
        }
    } else {
        for object in &objects {
            changed |= remove(store, instance, object.kind, &object.name).await?;
        }
    }

    debug!(component = component.name(), changed, "Ensured component");
    Ok(changed)
}

/// Identity of every component, in dependency order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentId {
    Credentials,
    RuntimeConfig,
    PriorityClasses,
    Broker,
    Storage,
    CertificateAuthority,
    LegacyCaSecretJob,
    Identity,
    Registry,
    Api,
    Ingest,
    Processor,
    Notifier,
    BrokerGateway,
    Dashboard,
}

impl ComponentId {
    /// Every component in convergence order.
    pub const ALL: [ComponentId; 15] = [
        ComponentId::Credentials,
        ComponentId::RuntimeConfig,
        ComponentId::PriorityClasses,
        ComponentId::Broker,
        ComponentId::Storage,
        ComponentId::CertificateAuthority,
        ComponentId::LegacyCaSecretJob,
        ComponentId::Identity,
        ComponentId::Registry,
        ComponentId::Api,
        ComponentId::Ingest,
        ComponentId::Processor,
        ComponentId::Notifier,
        ComponentId::BrokerGateway,
        ComponentId::Dashboard,
    ];

    /// Resolve the reconciler for this component.
    pub fn component(self) -> Box<dyn Component> {
        match self {
            ComponentId::Credentials => Box::new(Credentials),
            ComponentId::RuntimeConfig => Box::new(RuntimeConfig),
            ComponentId::PriorityClasses => Box::new(PriorityClasses),
            ComponentId::Broker => Box::new(StatefulComponent::BROKER),
            ComponentId::Storage => Box::new(StatefulComponent::STORAGE),
            ComponentId::CertificateAuthority => Box::new(StatefulComponent::CERTIFICATE_AUTHORITY),
            ComponentId::LegacyCaSecretJob => Box::new(LegacyCaSecretJob),
            ComponentId::Identity => Box::new(StatelessComponent::IDENTITY),
            ComponentId::Registry => Box::new(StatelessComponent::REGISTRY),
            ComponentId::Api => Box::new(StatelessComponent::API),
            ComponentId::Ingest => Box::new(StatelessComponent::INGEST),
            ComponentId::Processor => Box::new(StatelessComponent::PROCESSOR),
            ComponentId::Notifier => Box::new(StatelessComponent::NOTIFIER),
            ComponentId::BrokerGateway => Box::new(StatefulComponent::BROKER_GATEWAY),
            ComponentId::Dashboard => Box::new(StatelessComponent::DASHBOARD),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component().name())
    }
}
