//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the cluster store, operator configuration and optional health state.

use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::controller::notifications::{Notification, NotificationReason};
use crate::crd::Platform;
use crate::health::HealthState;
use crate::store::ClusterStore;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "platform-operator";

/// Shared context for the controller
pub struct Context<S> {
    /// Cluster access
    pub store: S,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl<S: ClusterStore> Context<S> {
    /// Create a new context
    pub fn new(store: S, config: OperatorConfig, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            store,
            config,
            health_state,
        }
    }

    /// Publish a notification about an instance
    pub async fn notify(
        &self,
        instance: &Platform,
        reason: NotificationReason,
        message: impl Into<String>,
    ) {
        let notification = Notification::new(reason, message);
        tracing::debug!(reason = %notification.reason, message = %notification.message, "Publishing notification");
        self.store.publish(instance, &notification).await;
    }
}
