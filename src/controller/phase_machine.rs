//! Finite state machine for the Platform reconciliation phase.
//!
//! ## Phase flow
//!
//! Unknown → Reconciling (fresh install or migrated legacy state)
//! Reconciling → Reconciled, and back on every pass
//! Reconciling/Reconciled → Upgrading → Reconciled (gated version change)
//! any → Failed (unparseable target version)
//! any → ManualMaintenance → Reconciling (maintenance switch)

use std::fmt;

use crate::crd::ReconciliationPhase;

/// Events that trigger phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    /// First sight of an instance without legacy state
    Initialized,
    /// Legacy state was migrated
    Migrated,
    /// A version change passed the upgrade gate
    UpgradeAllowed,
    /// Every component converged
    Converged,
    /// The declared version cannot be parsed
    InvalidVersion,
    /// The maintenance switch was turned on
    MaintenanceEntered,
    /// The maintenance switch was turned off
    MaintenanceExited,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: ReconciliationPhase,
    pub to: ReconciliationPhase,
    pub event: PhaseEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ReconciliationPhase,
        to: ReconciliationPhase,
        event: PhaseEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: ReconciliationPhase,
        to: ReconciliationPhase,
        event: PhaseEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: ReconciliationPhase,
        event: PhaseEvent,
    },
}

impl TransitionResult {
    /// Target phase of a successful transition.
    pub fn target(&self) -> Option<ReconciliationPhase> {
        match self {
            TransitionResult::Success { to, .. } => Some(*to),
            TransitionResult::InvalidTransition { .. } => None,
        }
    }
}

/// Transition table for the Platform lifecycle
pub struct PhaseMachine {
    transitions: Vec<Transition>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        use PhaseEvent::*;
        use ReconciliationPhase::*;

        let mut transitions = vec![
            // ========================================
            // First sight
            // ========================================
            Transition::new(Unknown, Reconciling, Initialized, "Fresh install detected"),
            Transition::new(Unknown, Reconciling, Migrated, "Legacy state migrated"),
            // ========================================
            // Normal convergence
            // ========================================
            Transition::new(Reconciling, Reconciled, Converged, "All components converged"),
            Transition::new(Reconciled, Reconciled, Converged, "Re-converged on periodic pass"),
            Transition::new(Upgrading, Reconciled, Converged, "Upgrade rolled out"),
            Transition::new(Failed, Reconciled, Converged, "Recovered after valid version"),
            // ========================================
            // Upgrades
            // ========================================
            Transition::new(Reconciling, Upgrading, UpgradeAllowed, "Version change allowed"),
            Transition::new(Reconciled, Upgrading, UpgradeAllowed, "Version change allowed"),
            Transition::new(Failed, Upgrading, UpgradeAllowed, "Version change allowed"),
            Transition::new(Upgrading, Upgrading, UpgradeAllowed, "Upgrade still in progress"),
            // ========================================
            // Maintenance
            // ========================================
            Transition::new(ManualMaintenance, Reconciling, MaintenanceExited, "Maintenance ended"),
        ];

        // Version errors and maintenance can interrupt any tracked phase
        for from in [Reconciling, Upgrading, Reconciled, Failed] {
            transitions.push(Transition::new(
                from,
                Failed,
                InvalidVersion,
                "Declared version is invalid",
            ));
        }
        for from in [Unknown, Reconciling, Upgrading, Reconciled, Failed, ManualMaintenance] {
            transitions.push(Transition::new(
                from,
                ManualMaintenance,
                MaintenanceEntered,
                "Maintenance switch on",
            ));
        }

        Self { transitions }
    }

    /// Attempt a transition from `current` on `event`.
    pub fn transition(&self, current: ReconciliationPhase, event: PhaseEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid
    pub fn can_transition(&self, from: ReconciliationPhase, event: PhaseEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events from a given state
    pub fn valid_events(&self, state: ReconciliationPhase) -> Vec<PhaseEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}
