//! Upgrade gate.
//!
//! A version change is only rolled out from a healthy platform: either the
//! freshly computed health or the last persisted health must be Green.
//! Refusals are not retried automatically; the next pass re-evaluates.

use crate::crd::{HealthLevel, Platform};
use crate::version::version_changed;

/// Outcome of consulting the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn refuse(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// The recorded version when the declared one differs from it.
///
/// `None` when nothing is recorded yet (fresh install) or nothing changed.
pub fn pending_upgrade(instance: &Platform) -> Option<&str> {
    let recorded = instance
        .status
        .as_ref()
        .and_then(|s| s.platform_version.as_deref())
        .filter(|v| !v.trim().is_empty())?;
    version_changed(&instance.spec.version, recorded).then_some(recorded)
}

/// Decide whether a pending version change may proceed.
pub fn may_upgrade(instance: &Platform, computed: HealthLevel) -> GateDecision {
    let persisted = instance.status.as_ref().and_then(|s| s.health);
    let from = pending_upgrade(instance).unwrap_or("unknown");
    let to = &instance.spec.version;

    if computed == HealthLevel::Green {
        GateDecision::allow(format!("Upgrading {} -> {}: platform is healthy", from, to))
    } else if persisted == Some(HealthLevel::Green) {
        GateDecision::allow(format!(
            "Upgrading {} -> {}: last recorded health was Green",
            from, to
        ))
    } else {
        GateDecision::refuse(format!(
            "Upgrade {} -> {} blocked: health is {} (last recorded {})",
            from,
            to,
            computed,
            persisted.map_or_else(|| "none".to_string(), |h| h.to_string())
        ))
    }
}
