//! Prometheus metrics for skyclaw coordinators and hosts
//!
//! This module provides metrics tracking for:
//! - Coordinator: hosts, job lifecycle, lease reclaims, replication, API requests
//! - Host agent: job executions and their duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::coordinator::ledger::LedgerStats;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    registered_hosts: Gauge,
    jobs: GaugeVec,
    jobs_enqueued: CounterVec,
    claims: CounterVec,
    completions: CounterVec,
    leases_reclaimed: Counter,
    replication_pushes: CounterVec,
    quorum_failures: Counter,
    peer_pulls: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for all host agent metrics
struct HostMetrics {
    executions: CounterVec,
    execution_duration: HistogramVec,
    in_flight: Gauge,
}

/// Global storage for coordinator metrics
static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

/// Global storage for host metrics
static HOST_METRICS: OnceLock<HostMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = skyclaw::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordinator = CoordinatorMetrics {
        registered_hosts: register_gauge!(
            "skyclaw_coordinator_registered_hosts",
            "Number of hosts known to the coordinator"
        )?,
        jobs: register_gauge_vec!(
            "skyclaw_coordinator_jobs",
            "Jobs in the ledger by status",
            &["status"]
        )?,
        jobs_enqueued: register_counter_vec!(
            "skyclaw_coordinator_jobs_enqueued_total",
            "Total jobs accepted by payload kind",
            &["kind"]
        )?,
        claims: register_counter_vec!(
            "skyclaw_coordinator_claims_total",
            "Total claim calls by outcome",
            &["outcome"]
        )?,
        completions: register_counter_vec!(
            "skyclaw_coordinator_completions_total",
            "Total job completions by final status",
            &["status"]
        )?,
        leases_reclaimed: register_counter!(
            "skyclaw_coordinator_leases_reclaimed_total",
            "Total expired leases returned to the queue"
        )?,
        replication_pushes: register_counter_vec!(
            "skyclaw_coordinator_replication_pushes_total",
            "Snapshot pushes to peers by result",
            &["result"]
        )?,
        quorum_failures: register_counter!(
            "skyclaw_coordinator_quorum_failures_total",
            "Writes acknowledged by fewer peers than required"
        )?,
        peer_pulls: register_counter_vec!(
            "skyclaw_coordinator_peer_pulls_total",
            "Anti-entropy snapshot pulls by result",
            &["result"]
        )?,
        api_requests: register_counter_vec!(
            "skyclaw_coordinator_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "skyclaw_coordinator_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let host = HostMetrics {
        executions: register_counter_vec!(
            "skyclaw_host_executions_total",
            "Jobs executed on this host by kind and outcome",
            &["kind", "outcome"]
        )?,
        execution_duration: register_histogram_vec!(
            "skyclaw_host_execution_duration_seconds",
            "Job execution time in seconds",
            &["kind"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )?,
        in_flight: register_gauge!(
            "skyclaw_host_jobs_in_flight",
            "Jobs currently executing on this host"
        )?,
    };

    // Store metrics - these should always succeed since we just created them
    COORDINATOR_METRICS
        .set(coordinator)
        .map_err(|_| "Coordinator metrics already initialized")?;
    HOST_METRICS
        .set(host)
        .map_err(|_| "Host metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some() && HOST_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update the registered host gauge
pub fn set_registered_hosts(count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.registered_hosts.set(count as f64);
    }
}

/// Update the per-status job gauges
pub fn set_jobs_by_status(stats: &LedgerStats) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    m.jobs.with_label_values(&["queued"]).set(stats.queued as f64);
    m.jobs.with_label_values(&["leased"]).set(stats.leased as f64);
    m.jobs
        .with_label_values(&["completed"])
        .set(stats.completed as f64);
    m.jobs.with_label_values(&["failed"]).set(stats.failed as f64);
}

/// Record an accepted job
pub fn record_job_enqueued(kind: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.jobs_enqueued.with_label_values(&[kind]).inc();
    }
}

/// Record a claim call (`leased` or `empty`)
pub fn record_claim(outcome: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.claims.with_label_values(&[outcome]).inc();
    }
}

/// Record a completion report
pub fn record_completion(status: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.completions.with_label_values(&[status]).inc();
    }
}

/// Record leases returned to the queue by a sweep
pub fn record_leases_reclaimed(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.leases_reclaimed.inc_by(count as f64);
    }
}

/// Record one snapshot push (`acked` or `failed`)
pub fn record_replication_push(result: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.replication_pushes.with_label_values(&[result]).inc();
    }
}

/// Record a write that missed quorum
pub fn record_quorum_failure() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.quorum_failures.inc();
    }
}

/// Record one anti-entropy pull (`merged`, `unchanged` or `failed`)
pub fn record_peer_pull(result: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.peer_pulls.with_label_values(&[result]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an execution timer for a job kind
pub fn start_execution_timer(kind: &str) -> MetricsTimer {
    match HOST_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.execution_duration
                .with_label_values(&[kind])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

/// Record a finished execution (`success`, `failure`, `timeout` or `rejected`)
pub fn record_execution(kind: &str, outcome: &str) {
    if let Some(m) = HOST_METRICS.get() {
        m.executions.with_label_values(&[kind, outcome]).inc();
    }
}

/// Update the in-flight job gauge
pub fn set_jobs_in_flight(count: usize) {
    if let Some(m) = HOST_METRICS.get() {
        m.in_flight.set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
