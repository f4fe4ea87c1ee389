//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for reconciliation metrics (resource kind + namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ReconcileLabels {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-resource gauges (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ResourceLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ResourceLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for cluster operation attempts
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OperationLabels {
    pub namespace: String,
    pub name: String,
    pub operation: String,
}

impl EncodeLabelSet for OperationLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// 1 when `redis-cli --cluster check` passes
    pub cluster_healthy: Family<ResourceLabels, Gauge>,
    /// Reshard, rebalance, add-node and remove-follower attempts
    pub cluster_operations_total: Family<OperationLabels, Counter>,
    /// 1 when a replication group has a resolved master
    pub replication_has_master: Family<ResourceLabels, Gauge>,
    /// Times the resolved master moved to another pod
    pub replication_master_changes_total: Family<ResourceLabels, Counter>,
    /// Online replicas attached to the resolved master
    pub replication_connected_slaves: Family<ResourceLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "redis_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "redis_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "redis_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let cluster_healthy = Family::<ResourceLabels, Gauge>::default();
        registry.register(
            "redis_operator_cluster_healthy",
            "Whether redis-cli --cluster check reports a healthy cluster",
            cluster_healthy.clone(),
        );

        let cluster_operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "redis_operator_cluster_operations",
            "Cluster topology operations attempted",
            cluster_operations_total.clone(),
        );

        let replication_has_master = Family::<ResourceLabels, Gauge>::default();
        registry.register(
            "redis_operator_replication_has_master",
            "Whether a replication group has a resolved master",
            replication_has_master.clone(),
        );

        let replication_master_changes_total = Family::<ResourceLabels, Counter>::default();
        registry.register(
            "redis_operator_replication_master_changes",
            "Number of times the resolved replication master changed",
            replication_master_changes_total.clone(),
        );

        let replication_connected_slaves = Family::<ResourceLabels, Gauge>::default();
        registry.register(
            "redis_operator_replication_connected_slaves",
            "Online replicas attached to the resolved master",
            replication_connected_slaves.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            cluster_healthy,
            cluster_operations_total,
            replication_has_master,
            replication_master_changes_total,
            replication_connected_slaves,
            registry,
        }
    }

    fn resource(namespace: &str, name: &str) -> ResourceLabels {
        ResourceLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels::new(kind, namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        let labels = ReconcileLabels::new(kind, namespace, name);
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn set_cluster_healthy(&self, namespace: &str, name: &str, healthy: bool) {
        self.cluster_healthy
            .get_or_create(&Self::resource(namespace, name))
            .set(i64::from(healthy));
    }

    /// Count attempts of a cluster operation (`reshard`, `rebalance`, ...)
    pub fn record_cluster_operation(&self, namespace: &str, name: &str, operation: &str, count: u64) {
        if count == 0 {
            return;
        }
        let labels = OperationLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            operation: operation.to_string(),
        };
        self.cluster_operations_total
            .get_or_create(&labels)
            .inc_by(count);
    }

    /// Update replication gauges; `master_changed` bumps the change counter.
    pub fn record_replication(
        &self,
        namespace: &str,
        name: &str,
        has_master: bool,
        connected_slaves: u32,
        master_changed: bool,
    ) {
        let labels = Self::resource(namespace, name);
        self.replication_has_master
            .get_or_create(&labels)
            .set(i64::from(has_master));
        self.replication_connected_slaves
            .get_or_create(&labels)
            .set(i64::from(connected_slaves));
        if master_changed {
            self.replication_master_changes_total
                .get_or_create(&labels)
                .inc();
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
