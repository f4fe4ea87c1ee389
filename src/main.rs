//! redis-operator entry point.
//!
//! Serves health probes from the start, then blocks until this replica holds
//! the leader lease before running the Redis controllers. Losing the lease
//! ends the process with an error so the pod restarts and rejoins the
//! election.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use redis_operator::health::{HealthState, run_health_server};
use redis_operator::run_controller_scoped;

const LEASE_NAME: &str = "redis-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight reconciles after SIGTERM.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Who this replica is and what it watches.
#[derive(Debug)]
struct OperatorIdentity {
    holder_id: String,
    lease_namespace: String,
    /// None watches every namespace.
    watch_namespace: Option<String>,
}

impl OperatorIdentity {
    fn from_env() -> Self {
        let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            warn!(holder_id = %host, "POD_NAME not set, using hostname");
            host
        });
        let lease_namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, holding the lease in 'default'");
            "default".to_string()
        });
        let watch_namespace = std::env::var("WATCH_NAMESPACE")
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());
        Self {
            holder_id,
            lease_namespace,
            watch_namespace,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum LeaseError {
    #[error("leader lease taken over by another replica")]
    Lost,

    #[error("failed to renew leader lease: {0}")]
    Renew(String),
}

struct LeaderLease {
    lock: LeaseLock,
}

impl LeaderLease {
    fn new(client: Client, identity: &OperatorIdentity) -> Self {
        let lock = LeaseLock::new(
            client,
            &identity.lease_namespace,
            LeaseLockParams {
                holder_id: identity.holder_id.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        );
        Self { lock }
    }

    /// Block until the lease is ours.
    async fn acquire(&self) {
        loop {
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => return,
                Ok(_) => info!("Another replica holds the lease"),
                Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
            }
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        }
    }

    /// Renew the lease until renewal fails or it is lost.
    async fn hold(self) -> LeaseError {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => return LeaseError::Lost,
                Err(e) => return LeaseError::Renew(e.to_string()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redis_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let identity = OperatorIdentity::from_env();
    info!(
        holder_id = %identity.holder_id,
        lease_namespace = %identity.lease_namespace,
        watch_namespace = identity.watch_namespace.as_deref().unwrap_or("*"),
        "Starting redis-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes answer while this replica is still a follower
    let mut health = tokio::spawn({
        let health_state = health_state.clone();
        async move { run_health_server(health_state).await }
    });

    let lease = LeaderLease::new(client.clone(), &identity);
    tokio::select! {
        _ = lease.acquire() => info!(lease = LEASE_NAME, "Acquired leadership"),
        _ = shutdown_signal() => {
            info!("Shutdown before acquiring leadership");
            return Ok(());
        }
    }

    let mut controllers = tokio::spawn({
        let health_state = health_state.clone();
        async move {
            run_controller_scoped(
                client,
                Some(health_state),
                identity.watch_namespace.as_deref(),
            )
            .await
        }
    });

    let outcome: Result<(), Box<dyn std::error::Error>> = tokio::select! {
        lost = lease.hold() => {
            error!(error = %lost, "Leadership lost, stopping");
            Err(lost.into())
        }
        joined = &mut controllers => {
            error!(result = ?joined, "Controllers exited");
            Err("controllers exited".into())
        }
        joined = &mut health => {
            error!(result = ?joined, "Health server exited");
            Err("health server exited".into())
        }
        _ = shutdown_signal() => {
            info!(grace = ?SHUTDOWN_GRACE_PERIOD, "Shutdown signal received, draining");
            health_state.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
            Ok(())
        }
    };

    controllers.abort();
    health.abort();
    info!("Operator stopped");
    outcome
}

/// Resolves on SIGTERM or Ctrl+C.
///
/// Signal handler setup failures are fatal.
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
