//! Operator notifications.
//!
//! Notifications carry a stable reason code. The Kubernetes store publishes
//! them as Events on the Platform object.

use std::fmt;

/// Stable reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationReason {
    /// Declared version cannot be parsed
    InconsistentVersion,
    /// A disabled subsystem has no external connection details
    MissingExternalEndpoint,
    /// A convergence step failed
    ReconciliationFailed,
    /// An unexpected internal failure
    CriticalError,
    /// Phase or health changed after a pass
    StatusChanged,
    /// A version change passed the upgrade gate
    UpgradeStarted,
    /// A version change was refused by the upgrade gate
    UpgradeBlocked,
}

impl NotificationReason {
    /// Default severity of the reason.
    pub fn severity(self) -> Severity {
        match self {
            NotificationReason::StatusChanged | NotificationReason::UpgradeStarted => {
                Severity::Normal
            }
            NotificationReason::InconsistentVersion
            | NotificationReason::MissingExternalEndpoint
            | NotificationReason::ReconciliationFailed
            | NotificationReason::CriticalError
            | NotificationReason::UpgradeBlocked => Severity::Warning,
        }
    }

    /// Short action verb recorded alongside the event.
    pub fn action(self) -> &'static str {
        match self {
            NotificationReason::InconsistentVersion => "ValidateVersion",
            NotificationReason::MissingExternalEndpoint => "ValidateSpec",
            NotificationReason::ReconciliationFailed => "Reconcile",
            NotificationReason::CriticalError => "Reconcile",
            NotificationReason::StatusChanged => "UpdateStatus",
            NotificationReason::UpgradeStarted | NotificationReason::UpgradeBlocked => "Upgrade",
        }
    }
}

impl fmt::Display for NotificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// A single operator notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub reason: NotificationReason,
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    /// Create a notification with the reason's default severity.
    pub fn new(reason: NotificationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            severity: reason.severity(),
            message: message.into(),
        }
    }
}
