//! Reconciliation loop for Platform.
//!
//! One pass: handle deletion, ensure the finalizer, establish a coherent
//! status (migrating legacy state if needed), honor the maintenance switch,
//! validate the target version, gate upgrades on health, converge every
//! component in dependency order and record the resulting status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{add_finalizer, remove_finalizer};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::finalizer::{FINALIZER, finalize};
use crate::controller::health_scorer::compute_health;
use crate::controller::notifications::NotificationReason;
use crate::controller::phase_machine::{PhaseEvent, PhaseMachine, TransitionResult};
use crate::controller::sequencer::Sequencer;
use crate::controller::status::{compute_new_status, ensure_coherency, write_status};
use crate::controller::upgrade_gate::{may_upgrade, pending_upgrade};
use crate::crd::{HealthLevel, Platform, ReconciliationPhase};
use crate::resources::common::{instance_namespace, missing_external_endpoints};
use crate::store::ClusterStore;
use crate::version::parse_version;

/// Requeue after the finalizer was added
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);
/// Requeue after the initial status was established
const COHERENCY_REQUEUE: Duration = Duration::from_secs(2);

/// Periodic requeue interval for a phase
pub fn requeue_for(phase: ReconciliationPhase) -> Duration {
    match phase {
        ReconciliationPhase::Reconciled => Duration::from_secs(60),
        ReconciliationPhase::Upgrading => Duration::from_secs(10),
        ReconciliationPhase::ManualMaintenance => Duration::from_secs(30),
        ReconciliationPhase::Failed => Duration::from_secs(300),
        ReconciliationPhase::Unknown | ReconciliationPhase::Reconciling => Duration::from_secs(10),
    }
}

/// Reconcile a Platform
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile<S: ClusterStore>(obj: Arc<Platform>, ctx: Arc<Context<S>>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = instance_namespace(&obj);

    debug!(name = %name, namespace = %namespace, "Reconciling Platform");

    let result = reconcile_pass(&obj, &ctx).await;

    if result.is_ok()
        && let Some(ref health_state) = ctx.health_state
    {
        health_state.metrics.record_reconcile(
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
    }
    result
}

async fn reconcile_pass<S: ClusterStore>(obj: &Platform, ctx: &Context<S>) -> Result<Action, Error> {
    let name = obj.name_any();

    // Handle deletion
    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(obj, ctx).await;
    }

    // Ensure finalizer is present
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&ctx.store, obj, FINALIZER).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    // Fresh installs and legacy state get a starting status first
    match ensure_coherency(ctx, obj).await {
        Ok(true) => return Ok(Action::requeue(COHERENCY_REQUEUE)),
        Ok(false) => {}
        Err(e @ Error::Migration(_)) => {
            error!(name = %name, error = %e, "Legacy state migration failed");
            ctx.notify(obj, NotificationReason::CriticalError, e.to_string())
                .await;
            return Err(e);
        }
        Err(e) => return Err(e),
    }

    let machine = PhaseMachine::new();
    let stored_phase = obj
        .status
        .as_ref()
        .map(|s| s.phase())
        .unwrap_or_default();

    if obj.spec.maintenance {
        return handle_maintenance(obj, ctx, &machine, stored_phase).await;
    }

    let mut phase = if stored_phase == ReconciliationPhase::ManualMaintenance {
        info!(name = %name, "Maintenance switch off, resuming reconciliation");
        next_phase(&machine, stored_phase, PhaseEvent::MaintenanceExited)
    } else {
        stored_phase
    };

    // An unparseable target version only marks the phase
    if let Err(e) = parse_version(&obj.spec.version) {
        warn!(name = %name, version = %obj.spec.version, error = %e, "Invalid platform version");
        ctx.notify(obj, NotificationReason::InconsistentVersion, e.to_string())
            .await;
        let failed = next_phase(&machine, phase, PhaseEvent::InvalidVersion);
        write_status(ctx, obj, |status| {
            status.reconciliation_phase = Some(failed);
        })
        .await?;
        record_state(ctx, obj, failed, None);
        return Ok(Action::requeue(requeue_for(failed)));
    }

    // Disabled subsystems need somewhere else to connect to
    let missing = missing_external_endpoints(obj);
    if !missing.is_empty() {
        let message = format!(
            "Not deployed and no external endpoint configured: {}",
            missing.join(", ")
        );
        warn!(name = %name, components = ?missing, "Missing external endpoints");
        ctx.notify(obj, NotificationReason::MissingExternalEndpoint, message.clone())
            .await;
        return Err(Error::Validation(message));
    }

    let health = compute_health(&ctx.store, obj).await;

    // Version changes are gated on health
    if let Some(recorded) = pending_upgrade(obj) {
        let decision = may_upgrade(obj, health);
        if !decision.allowed {
            warn!(
                name = %name,
                from = %recorded,
                to = %obj.spec.version,
                health = %health,
                "Upgrade blocked"
            );
            ctx.notify(obj, NotificationReason::UpgradeBlocked, decision.reason)
                .await;
            write_status(ctx, obj, |status| {
                status.health = Some(health);
            })
            .await?;
            record_state(ctx, obj, phase, Some(health));
            return Ok(Action::requeue(requeue_for(phase)));
        }

        info!(name = %name, from = %recorded, to = %obj.spec.version, "Upgrade allowed");
        ctx.notify(obj, NotificationReason::UpgradeStarted, decision.reason)
            .await;
        phase = next_phase(&machine, phase, PhaseEvent::UpgradeAllowed);
        write_status(ctx, obj, |status| {
            status.reconciliation_phase = Some(phase);
            status.health = Some(health);
        })
        .await?;
    }

    // Converge every component in dependency order
    if let Err(e) = Sequencer::run(ctx, obj).await {
        ctx.notify(
            obj,
            NotificationReason::ReconciliationFailed,
            format!("Reconciliation failed: {}", e),
        )
        .await;
        return Err(e);
    }

    if let TransitionResult::InvalidTransition { current, event } =
        machine.transition(phase, PhaseEvent::Converged)
    {
        warn!(name = %name, current = %current, event = %event, "Unexpected phase transition");
    }

    let health = compute_health(&ctx.store, obj).await;
    let new_status = compute_new_status(obj, health);
    let previous = obj.status.clone().unwrap_or_default();

    write_status(ctx, obj, |status| {
        *status = new_status.clone();
    })
    .await?;

    if previous.phase() != ReconciliationPhase::Reconciled || previous.health != Some(health) {
        ctx.notify(
            obj,
            NotificationReason::StatusChanged,
            format!(
                "Phase {} -> {}, health {} -> {}",
                previous.phase(),
                ReconciliationPhase::Reconciled,
                previous
                    .health
                    .map_or_else(|| "unknown".to_string(), |h| h.to_string()),
                health
            ),
        )
        .await;
    }

    record_state(ctx, obj, ReconciliationPhase::Reconciled, Some(health));
    Ok(Action::requeue(requeue_for(ReconciliationPhase::Reconciled)))
}

/// Maintenance: refresh health and phase only, converge nothing.
async fn handle_maintenance<S: ClusterStore>(
    obj: &Platform,
    ctx: &Context<S>,
    machine: &PhaseMachine,
    stored_phase: ReconciliationPhase,
) -> Result<Action, Error> {
    let phase = next_phase(machine, stored_phase, PhaseEvent::MaintenanceEntered);
    let health = compute_health(&ctx.store, obj).await;
    debug!(name = %obj.name_any(), health = %health, "Maintenance mode, skipping convergence");

    write_status(ctx, obj, |status| {
        status.reconciliation_phase = Some(phase);
        status.health = Some(health);
    })
    .await?;

    record_state(ctx, obj, phase, Some(health));
    Ok(Action::requeue(requeue_for(phase)))
}

/// Handle deletion of a Platform
async fn handle_deletion<S: ClusterStore>(obj: &Platform, ctx: &Context<S>) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    if obj.finalizers().iter().any(|f| f == FINALIZER) {
        let report = finalize(ctx, obj).await?;
        if !report.is_clean() {
            warn!(
                name = %name,
                failures = ?report.failures,
                "Finalization left objects behind"
            );
        }
        remove_finalizer(&ctx.store, obj, FINALIZER).await?;
        info!(name = %name, "Finalizer removed");
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .remove_platform(&instance_namespace(obj), &name);
    }

    Ok(Action::await_change())
}

fn next_phase(
    machine: &PhaseMachine,
    current: ReconciliationPhase,
    event: PhaseEvent,
) -> ReconciliationPhase {
    match machine.transition(current, event) {
        TransitionResult::Success { to, description, .. } => {
            debug!(from = %current, to = %to, event = %event, description, "Phase transition");
            to
        }
        TransitionResult::InvalidTransition { current, event } => {
            warn!(current = %current, event = %event, "Invalid phase transition, keeping phase");
            current
        }
    }
}

fn record_state<S>(
    ctx: &Context<S>,
    obj: &Platform,
    phase: ReconciliationPhase,
    health: Option<HealthLevel>,
) {
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.set_platform_state(
            &instance_namespace(obj),
            &obj.name_any(),
            phase,
            health,
        );
    }
}

/// Error policy for the controller
///
/// Determines how to handle reconciliation errors.
pub fn error_policy<S: ClusterStore>(obj: Arc<Platform>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    let name = obj.name_any();
    let namespace = instance_namespace(&obj);

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
