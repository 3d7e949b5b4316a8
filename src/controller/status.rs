//! Status management.
//!
//! Every status write goes through [`write_status`]: a read-modify-write
//! that re-fetches the instance, re-applies the mutation and retries on
//! optimistic-concurrency conflicts with backoff. Also hosts the condition
//! helpers and the coherency check run at the start of every pass.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::migration::migrate_if_needed;
use crate::controller::phase_machine::{PhaseEvent, PhaseMachine};
use crate::crd::{Condition, HealthLevel, Platform, PlatformStatus, ReconciliationPhase};
use crate::resources::common::{api_url, broker_url, instance_namespace};
use crate::retry::retry_with_backoff;
use crate::store::ClusterStore;

/// Version of this operator, recorded in every status it writes
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from an existing conditions list
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// The previous transition time is kept when status and reason are unchanged.
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status && existing.reason == condition.reason {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set Progressing condition
    pub fn progressing(
        &mut self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    /// Set Degraded condition
    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}

/// Status after a fully converged pass.
pub fn compute_new_status(instance: &Platform, health: HealthLevel) -> PlatformStatus {
    let previous = instance.status.clone().unwrap_or_default();
    let generation = instance.metadata.generation;

    let mut conditions = ConditionBuilder::from_existing(&previous.conditions);
    conditions
        .ready(true, "Converged", "All components converged", generation)
        .progressing(false, "Converged", "No rollout in progress", generation)
        .degraded(
            health != HealthLevel::Green,
            &format!("Health{}", health),
            &format!("Aggregate health is {}", health),
            generation,
        );

    PlatformStatus {
        reconciliation_phase: Some(ReconciliationPhase::Reconciled),
        platform_version: Some(instance.spec.version.clone()),
        operator_version: Some(OPERATOR_VERSION.to_string()),
        health: Some(health),
        api_url: Some(api_url(instance)),
        broker_url: Some(broker_url(instance)),
        legacy_workload_names: previous.legacy_workload_names,
        observed_generation: generation,
        conditions: conditions.build(),
    }
}

/// Persist a status mutation with optimistic-concurrency retry.
///
/// The instance is re-fetched before every attempt so the mutation always
/// applies to the latest stored status. A phase, once set, is never cleared.
pub async fn write_status<S, F>(ctx: &Context<S>, instance: &Platform, mutate: F) -> Result<Platform>
where
    S: ClusterStore,
    F: Fn(&mut PlatformStatus) + Sync,
{
    let name = instance.name_any();
    let namespace = instance_namespace(instance);
    let mutate = &mutate;

    retry_with_backoff(
        &ctx.config.status_retry,
        "write_status",
        Error::is_conflict,
        || {
            let name = name.clone();
            let namespace = namespace.clone();
            async move {
                let mut fresh = ctx.store.get_instance(&namespace, &name).await?;
                let previous = fresh.status.clone().unwrap_or_default();

                let mut status = previous.clone();
                mutate(&mut status);
                if status.reconciliation_phase.is_none() {
                    status.reconciliation_phase = previous.reconciliation_phase;
                }

                if status == previous && fresh.status.is_some() {
                    debug!(instance = %name, "Status unchanged, skipping write");
                    return Ok(fresh);
                }

                fresh.status = Some(status);
                ctx.store.replace_instance_status(&fresh).await
            }
        },
    )
    .await
}

/// Make sure the instance has a coherent starting status.
///
/// Returns `true` when the caller should requeue: legacy state was migrated
/// or a fresh install was initialized.
pub async fn ensure_coherency<S: ClusterStore>(ctx: &Context<S>, instance: &Platform) -> Result<bool> {
    let phase = instance
        .status
        .as_ref()
        .and_then(|s| s.reconciliation_phase);
    if phase.is_some() {
        return Ok(false);
    }

    if migrate_if_needed(ctx, instance).await? {
        return Ok(true);
    }

    let target = PhaseMachine::new()
        .transition(ReconciliationPhase::Unknown, PhaseEvent::Initialized)
        .target()
        .unwrap_or(ReconciliationPhase::Reconciling);

    info!(instance = %instance.name_any(), phase = %target, "Initializing fresh install");
    write_status(ctx, instance, |status| {
        status.reconciliation_phase = Some(target);
        status.operator_version = Some(OPERATOR_VERSION.to_string());
    })
    .await?;
    Ok(true)
}
