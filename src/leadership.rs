//! Leader election over a coordination Lease.
//!
//! Only the lease holder runs the controller. Losing the lease ends the
//! guarded work and is reported to the caller, which exits so that
//! Kubernetes restarts the replica and it re-enters the election.

use std::future::Future;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;

/// Why a leader stopped leading.
#[derive(Debug, Error)]
pub enum LeadershipError {
    #[error("lease {0} was taken over by another holder")]
    Lost(String),

    #[error("failed to renew lease {lease}: {message}")]
    Renewal { lease: String, message: String },
}

/// Lease-based election for one replica.
pub struct LeaderElector {
    lock: LeaseLock,
    holder_id: String,
    config: OperatorConfig,
}

impl LeaderElector {
    /// Build an elector for the lease configured in `config`, held in the
    /// operator's own namespace.
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        let holder_id = config.holder_id();
        let settings = &config.leader_election;
        let lock = LeaseLock::new(
            client,
            &config.pod_namespace,
            LeaseLockParams {
                holder_id: holder_id.clone(),
                lease_name: settings.lease_name.clone(),
                lease_ttl: settings.lease_ttl,
            },
        );
        Self {
            lock,
            holder_id,
            config: config.clone(),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Block until this replica holds the lease.
    async fn acquire(&self) {
        let settings = &self.config.leader_election;
        info!(
            holder_id = %self.holder_id,
            namespace = %self.config.pod_namespace,
            lease_name = %settings.lease_name,
            "Waiting to acquire leadership"
        );
        loop {
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {
                    info!(holder_id = %self.holder_id, "Acquired leadership");
                    return;
                }
                Ok(_) => info!("Another replica is leader, waiting"),
                Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
            }
            tokio::time::sleep(settings.renew_interval).await;
        }
    }

    /// Renew the lease until it is lost or cannot be renewed.
    async fn hold(&self) -> LeadershipError {
        let lease = self.config.leader_election.lease_name.clone();
        loop {
            tokio::time::sleep(self.config.leader_election.renew_interval).await;
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => return LeadershipError::Lost(lease),
                Err(e) => {
                    return LeadershipError::Renewal {
                        lease,
                        message: e.to_string(),
                    };
                }
            }
        }
    }

    /// Run `work` once leadership is acquired, for as long as it is held.
    ///
    /// Returns `Ok` when the work finishes on its own and an error as soon
    /// as leadership is lost, dropping the work.
    pub async fn run_with_leadership<F>(&self, work: F) -> Result<(), LeadershipError>
    where
        F: Future<Output = ()>,
    {
        self.acquire().await;
        tokio::select! {
            () = work => Ok(()),
            lost = self.hold() => {
                error!(holder_id = %self.holder_id, error = %lost, "Leadership lost");
                Err(lost)
            }
        }
    }
}
