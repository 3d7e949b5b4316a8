//! Controller module for platform-operator.
//!
//! Contains the reconciliation loop, the phase machine, error handling,
//! status management and the steps a pass is made of: legacy migration,
//! health scoring, upgrade gating, dependency sequencing and finalization.

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod notifications;
pub mod status;

// Pass steps
pub mod finalizer;
pub mod health_scorer;
pub mod migration;
pub mod phase_machine;
pub mod sequencer;
pub mod upgrade_gate;

// Pass driver
pub mod reconciler;
