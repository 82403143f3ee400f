//! Prometheus metrics for the stratum controller
//!
//! Exposes reconciliation counts and durations, and how often each kind of
//! version-sync transition happened.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Controller metrics registry
///
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    /// Total reconciliations by result (success, error)
    pub reconciliations_total: IntCounterVec,
    /// Reconciliation duration in seconds
    pub reconciliation_duration_seconds: Histogram,
    /// Sync outcomes (started, progressing, completed, aborted, ...)
    pub sync_outcomes_total: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "stratum_reconciliations_total",
                "Total number of reconciliations",
            ),
            &["result"],
        )?;
        registry.register(Box::new(reconciliations_total.clone()))?;

        let reconciliation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "stratum_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(reconciliation_duration_seconds.clone()))?;

        let sync_outcomes_total = IntCounterVec::new(
            Opts::new(
                "stratum_sync_outcomes_total",
                "Version sync ticks by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(sync_outcomes_total.clone()))?;

        Ok(Self {
            registry,
            reconciliations_total,
            reconciliation_duration_seconds,
            sync_outcomes_total,
        })
    }

    pub fn record_reconciliation_success(&self, outcome: &str, duration_secs: f64) {
        self.reconciliations_total
            .with_label_values(&["success"])
            .inc();
        self.sync_outcomes_total.with_label_values(&[outcome]).inc();
        self.reconciliation_duration_seconds.observe(duration_secs);
    }

    pub fn record_reconciliation_error(&self, duration_secs: f64) {
        self.reconciliations_total
            .with_label_values(&["error"])
            .inc();
        self.reconciliation_duration_seconds.observe(duration_secs);
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }
}

pub type SharedMetrics = Arc<ControllerMetrics>;

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
