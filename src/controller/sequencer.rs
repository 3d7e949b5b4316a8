//! Dependency sequencer.
//!
//! Components are converged in a fixed order so that each one finds its
//! dependencies already in place: credentials and configuration first, then
//! infrastructure (broker, storage, CA), then the microservices, the broker
//! gateway and finally the dashboard. The first failure aborts the pass.

use std::time::Instant;

use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::components::{ComponentId, ensure};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::Platform;
use crate::store::ClusterStore;
use crate::version::{is_pre_1_0, parse_version};

pub struct Sequencer;

impl Sequencer {
    /// Ordered list of components converged for this instance.
    ///
    /// The legacy CA secret job is only part of the plan for pre-1.0 targets
    /// with the feature enabled.
    pub fn plan(instance: &Platform) -> Vec<ComponentId> {
        let legacy_ca_job = instance.spec.features.legacy_ca_job
            && parse_version(&instance.spec.version).is_ok_and(|v| is_pre_1_0(&v));

        ComponentId::ALL
            .into_iter()
            .filter(|id| *id != ComponentId::LegacyCaSecretJob || legacy_ca_job)
            .collect()
    }

    /// Converge every planned component in order.
    ///
    /// The error of the first failing component is returned unchanged and
    /// no later component is attempted.
    pub async fn run<S: ClusterStore>(ctx: &Context<S>, instance: &Platform) -> Result<()> {
        let name = instance.name_any();
        let started = Instant::now();
        let mut changed = 0usize;

        for id in Self::plan(instance) {
            let component = id.component();
            match ensure(&ctx.store, instance, component.as_ref()).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(instance = %name, component = %id, error = %e, "Component convergence failed");
                    return Err(e);
                }
            }
            debug!(instance = %name, component = %id, "Component converged");
        }

        info!(
            instance = %name,
            changed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All components converged"
        );
        Ok(())
    }
}
