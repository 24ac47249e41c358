//! Operation metrics for the sync core
//!
//! Each reader, writer and list call is wrapped in an [`OperationMetrics`]
//! guard that records duration and outcome, labeled by operation.
//!
//! # Metrics
//!
//! - `convsync_operations_total`: Counter of started operations
//! - `convsync_operation_duration_seconds`: Histogram of operation duration
//! - `convsync_outcomes_total`: Counter of finished operations by outcome
//! - `convsync_active_operations`: Gauge of in-flight operations
//! - `convsync_cache_lookups_total`: Counter of cache lookups by result
//! - `convsync_read_fallbacks_total`: Counter of read strategies that fell through
//!
//! # Examples
//!
//! ```
//! use convsync::sync::metrics::OperationMetrics;
//!
//! let metrics = OperationMetrics::new("read");
//! metrics.record_outcome("ok");
//! ```

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Metrics guard for a single core operation
///
/// Uses an atomic flag so the outcome can be recorded through a shared
/// reference while the guard lives across `.await` points. If dropped
/// without an outcome (for example when the caller abandons the future)
/// the operation is recorded as `cancelled`.
#[derive(Debug)]
pub struct OperationMetrics {
    operation: &'static str,
    start: Instant,
    recorded: AtomicBool,
}

impl OperationMetrics {
    /// Start tracking an operation
    pub fn new(operation: &'static str) -> Self {
        increment_counter!("convsync_operations_total", "operation" => operation);
        increment_gauge!("convsync_active_operations", 1.0, "operation" => operation);

        Self {
            operation,
            start: Instant::now(),
            recorded: AtomicBool::new(false),
        }
    }

    /// Record how the operation finished; later calls are ignored
    pub fn record_outcome(&self, outcome: &str) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }

        histogram!(
            "convsync_operation_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "operation" => self.operation,
            "outcome" => outcome.to_string()
        );
        increment_counter!(
            "convsync_outcomes_total",
            "operation" => self.operation,
            "outcome" => outcome.to_string()
        );
        decrement_gauge!("convsync_active_operations", 1.0, "operation" => self.operation);
    }

    /// Operation label
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Time since the operation started
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationMetrics {
    fn drop(&mut self) {
        if !self.recorded.load(Ordering::SeqCst) {
            self.record_outcome("cancelled");
        }
    }
}

/// Count a cache lookup
pub fn record_cache_lookup(hit: bool) {
    increment_counter!(
        "convsync_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    );
}

/// Count a read strategy that did not produce a result
pub fn record_read_fallback(strategy: &'static str) {
    increment_counter!("convsync_read_fallbacks_total", "strategy" => strategy);
}

/// Install the Prometheus exporter when the `prometheus` feature is enabled
///
/// A no-op otherwise; safe to call unconditionally.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let _ = PrometheusBuilder::new().install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
