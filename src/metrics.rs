//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `credit_commits_total` - Committed balance mutations
//! - `credit_insufficient_total` - Rejections for insufficient credits
//! - `credit_commit_failures_swallowed_total` - Post-success consumption
//!   commits that failed and were logged instead of surfaced; the
//!   reconciliation signal for the pay-after-success trade-off
//! - `credit_meter_batches_total` - Whole-credit debits produced by the
//!   usage meter
//! - `credit_commit_duration_seconds` - Commit latency histogram

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed balance mutations
    pub commits_total: IntCounter,

    /// Insufficient-credit rejections
    pub insufficient_total: IntCounter,

    /// Swallowed post-success commit failures
    pub commit_failures_swallowed: IntCounter,

    /// Meter batches converted into debits
    pub meter_batches_total: IntCounter,

    /// Commit latency histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let commits_total = IntCounter::new(
            "credit_commits_total",
            "Committed balance mutations",
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let insufficient_total = IntCounter::new(
            "credit_insufficient_total",
            "Rejections for insufficient credits",
        )?;
        registry.register(Box::new(insufficient_total.clone()))?;

        let commit_failures_swallowed = IntCounter::new(
            "credit_commit_failures_swallowed_total",
            "Post-success consumption commits that failed and were only logged",
        )?;
        registry.register(Box::new(commit_failures_swallowed.clone()))?;

        let meter_batches_total = IntCounter::new(
            "credit_meter_batches_total",
            "Whole-credit debits produced by the usage meter",
        )?;
        registry.register(Box::new(meter_batches_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "credit_commit_duration_seconds",
                "Commit latency histogram",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            commits_total,
            insufficient_total,
            commit_failures_swallowed,
            meter_batches_total,
            commit_duration,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.commits_total.get(), 0);
        assert_eq!(metrics.commit_failures_swallowed.get(), 0);
    }

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.commits_total.inc();
        metrics.commits_total.inc();
        metrics.insufficient_total.inc();
        assert_eq!(metrics.commits_total.get(), 2);
        assert_eq!(metrics.insufficient_total.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not collide (no global registry involved)
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.commits_total.inc();
        assert_eq!(b.commits_total.get(), 0);
    }
}
