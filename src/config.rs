//! Operator configuration loaded from the environment.

use std::time::Duration;

use tracing::warn;

use crate::retry::RetryConfig;

/// Default port for the health and metrics server
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default name of the leader election lease
pub const DEFAULT_LEASE_NAME: &str = "platform-operator-leader";

/// Leader election timing.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    /// How long a lease stays valid without renewal
    pub lease_ttl: Duration,
    /// Renewal period; always shorter than the TTL
    pub renew_interval: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(15),
            renew_interval: Duration::from_secs(5),
        }
    }
}

/// Runtime configuration of the operator process.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch. `None` watches cluster-wide.
    pub namespace: Option<String>,
    /// Retry policy for optimistic-concurrency status writes
    pub status_retry: RetryConfig,
    /// Port of the health and metrics server
    pub health_port: u16,
    /// Identity of this replica for leader election and events
    pub pod_name: Option<String>,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    pub leader_election: LeaderElectionConfig,
    /// Time given to in-flight passes after a shutdown signal
    pub shutdown_grace: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            status_retry: RetryConfig::default(),
            health_port: DEFAULT_HEALTH_PORT,
            pod_name: None,
            pod_namespace: "default".to_string(),
            leader_election: LeaderElectionConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Malformed values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let status_retry = RetryConfig {
            max_attempts: parse_or(
                &lookup,
                "STATUS_RETRY_MAX_ATTEMPTS",
                defaults.status_retry.max_attempts,
            ),
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "STATUS_RETRY_INITIAL_DELAY_MS",
                defaults.status_retry.initial_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                "STATUS_RETRY_MAX_DELAY_MS",
                defaults.status_retry.max_delay.as_millis() as u64,
            )),
            backoff_multiplier: defaults.status_retry.backoff_multiplier,
        };

        let mut leader_election = LeaderElectionConfig {
            lease_name: non_empty("LEASE_NAME").unwrap_or(defaults.leader_election.lease_name),
            lease_ttl: Duration::from_secs(parse_or(
                &lookup,
                "LEASE_TTL_SECS",
                defaults.leader_election.lease_ttl.as_secs(),
            )),
            renew_interval: Duration::from_secs(parse_or(
                &lookup,
                "LEASE_RENEW_INTERVAL_SECS",
                defaults.leader_election.renew_interval.as_secs(),
            )),
        };
        if leader_election.renew_interval.is_zero()
            || leader_election.renew_interval >= leader_election.lease_ttl
        {
            warn!(
                ttl_secs = leader_election.lease_ttl.as_secs(),
                renew_secs = leader_election.renew_interval.as_secs(),
                "Lease renewal must be shorter than its TTL, using default timing"
            );
            leader_election.lease_ttl = defaults.leader_election.lease_ttl;
            leader_election.renew_interval = defaults.leader_election.renew_interval;
        }

        Self {
            namespace: non_empty("OPERATOR_NAMESPACE"),
            status_retry,
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port),
            pod_name: non_empty("POD_NAME"),
            pod_namespace: non_empty("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
            leader_election,
            shutdown_grace: Duration::from_secs(parse_or(
                &lookup,
                "SHUTDOWN_GRACE_PERIOD_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
        }
    }

    /// Identity of this replica: `POD_NAME`, else the hostname.
    pub fn holder_id(&self) -> String {
        self.pod_name.clone().unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = %key, value = %raw, default = %default, "Malformed setting, using default");
                default
            }
        },
    }
}
