//! platform-operator - A Kubernetes operator converging Platform custom resources.
//!
//! Startup: structured logging, configuration from the environment, the
//! health server (probes answer even on standby replicas), then the
//! controller for as long as this replica holds the leader lease.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use platform_operator::OperatorConfig;
use platform_operator::health::{HealthState, run_health_server};
use platform_operator::leadership::LeaderElector;
use platform_operator::run_controller;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("platform_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let mut config = OperatorConfig::from_env();
    info!(
        watch_namespace = config.namespace.as_deref().unwrap_or("*"),
        health_port = config.health_port,
        "Starting platform-operator"
    );

    let client = Client::try_default().await?;
    let elector = LeaderElector::new(client.clone(), &config);
    // Events are reported under the same identity the lease is held by
    config.pod_name = Some(elector.holder_id().to_string());
    let shutdown_grace = config.shutdown_grace;

    let health_state = Arc::new(HealthState::new());
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!(error = %e, "Health server error");
            }
        })
    };

    let controller = run_controller(client, config, Some(health_state.clone()));

    tokio::select! {
        result = elector.run_with_leadership(controller) => {
            // Exit non-zero so Kubernetes restarts us into the election
            result?;
            info!("Controller stopped");
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, draining");
            health_state.set_ready(false).await;
            info!(
                grace_secs = shutdown_grace.as_secs(),
                "Waiting for in-flight reconciliations"
            );
            tokio::time::sleep(shutdown_grace).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
///
/// Without signal handlers there is no graceful shutdown, so failing to
/// install them is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
