//! Prometheus metrics for the controller loops.
//!
//! # Metrics Families
//!
//! | Metric | Type | Description | Labels |
//! |--------|------|-------------|--------|
//! | `modelver_reconcile_total` | Counter | Handler invocations | `kind`, `handler`, `outcome` |
//! | `modelver_reconcile_latency_seconds` | Histogram | Time to process one key | `kind` |
//! | `modelver_workqueue_depth` | Gauge | Keys waiting in the queue | `kind` |
//! | `modelver_workqueue_retries_total` | Counter | Keys re-queued after an error | `kind` |
//! | `modelver_versions_assigned_total` | Counter | Version numbers handed out | |
//!
//! # Usage
//!
//! ```rust,ignore
//! use modelver_daemon::metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new()?;
//! let metrics = registry.controller_metrics();
//! metrics.handler_completed("ModelTemplate", "template-controller-sync-latest-version", true);
//! let output = registry.encode_text()?;
//! ```

use std::sync::Arc;

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Maximum length for label values to prevent unbounded label cardinality.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

/// Histogram buckets for per-key reconcile latency (in seconds).
pub const RECONCILE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0, 5.0];

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Controller metrics.
///
/// All metrics use interior mutability; the struct is cheap to clone and
/// safe to share across worker tasks.
#[derive(Clone)]
pub struct ControllerMetrics {
    reconcile_total: CounterVec,
    reconcile_latency: HistogramVec,
    workqueue_depth: GaugeVec,
    workqueue_retries_total: CounterVec,
    versions_assigned_total: Counter,
}

impl ControllerMetrics {
    /// Creates controller metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate name).
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let reconcile_total = CounterVec::new(
            Opts::new("modelver_reconcile_total", "Total handler invocations"),
            &["kind", "handler", "outcome"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let reconcile_latency = HistogramVec::new(
            HistogramOpts::new(
                "modelver_reconcile_latency_seconds",
                "Time to run every handler for one key",
            )
            .buckets(RECONCILE_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(reconcile_latency.clone()))?;

        let workqueue_depth = GaugeVec::new(
            Opts::new("modelver_workqueue_depth", "Keys waiting to be processed"),
            &["kind"],
        )?;
        registry.register(Box::new(workqueue_depth.clone()))?;

        let workqueue_retries_total = CounterVec::new(
            Opts::new(
                "modelver_workqueue_retries_total",
                "Keys re-queued with backoff after a handler error",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(workqueue_retries_total.clone()))?;

        let versions_assigned_total = Counter::new(
            "modelver_versions_assigned_total",
            "Version numbers assigned to template versions",
        )?;
        registry.register(Box::new(versions_assigned_total.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_latency,
            workqueue_depth,
            workqueue_retries_total,
            versions_assigned_total,
        })
    }

    /// Records one handler invocation.
    pub fn handler_completed(&self, kind: &str, handler: &str, success: bool) {
        let outcome = if success { "success" } else { "error" };
        self.reconcile_total
            .with_label_values(&[truncate_label(kind), truncate_label(handler), outcome])
            .inc();
    }

    /// Returns the invocation count for one handler and outcome.
    #[must_use]
    pub fn handler_count(&self, kind: &str, handler: &str, success: bool) -> f64 {
        let outcome = if success { "success" } else { "error" };
        self.reconcile_total
            .with_label_values(&[truncate_label(kind), truncate_label(handler), outcome])
            .get()
    }

    /// Records the time spent processing one key.
    pub fn observe_latency(&self, kind: &str, latency_secs: f64) {
        self.reconcile_latency
            .with_label_values(&[truncate_label(kind)])
            .observe(latency_secs);
    }

    /// Sets the current queue depth.
    #[allow(clippy::cast_precision_loss)] // queue depth never approaches 2^52
    pub fn set_queue_depth(&self, kind: &str, depth: usize) {
        self.workqueue_depth
            .with_label_values(&[truncate_label(kind)])
            .set(depth as f64);
    }

    /// Returns the last recorded queue depth.
    #[must_use]
    pub fn queue_depth(&self, kind: &str) -> f64 {
        self.workqueue_depth
            .with_label_values(&[truncate_label(kind)])
            .get()
    }

    /// Records a rate-limited re-queue.
    pub fn retry_scheduled(&self, kind: &str) {
        self.workqueue_retries_total
            .with_label_values(&[truncate_label(kind)])
            .inc();
    }

    /// Returns the number of rate-limited re-queues.
    #[must_use]
    pub fn retry_count(&self, kind: &str) -> f64 {
        self.workqueue_retries_total
            .with_label_values(&[truncate_label(kind)])
            .get()
    }

    /// Records a successful version assignment.
    pub fn version_assigned(&self) {
        self.versions_assigned_total.inc();
    }

    /// Returns the number of assigned versions.
    #[must_use]
    pub fn versions_assigned(&self) -> f64 {
        self.versions_assigned_total.get()
    }
}

/// Registry holding the controller metrics.
pub struct MetricsRegistry {
    registry: Registry,
    controller_metrics: ControllerMetrics,
}

impl MetricsRegistry {
    /// Creates a registry with every controller metric registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let controller_metrics = ControllerMetrics::new(&registry)?;
        Ok(Self {
            registry,
            controller_metrics,
        })
    }

    /// Returns the controller metrics.
    #[must_use]
    pub const fn controller_metrics(&self) -> &ControllerMetrics {
        &self.controller_metrics
    }

    /// Encodes every metric in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

/// Shared metrics registry.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Creates a new shared metrics registry.
///
/// # Errors
///
/// Returns an error if metric registration fails.
pub fn new_shared_registry() -> MetricsResult<SharedMetricsRegistry> {
    Ok(Arc::new(MetricsRegistry::new()?))
}

/// Truncates a label value at a UTF-8 boundary.
fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_LABEL_VALUE_LEN)
        .last()
        .unwrap_or(0);
    &value[..end]
}
