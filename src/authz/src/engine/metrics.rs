//! Prometheus metrics collection for enforcer observability
//!
//! Counters are plain atomics so that recording from the read path never
//! takes a lock or awaits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the enforcer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions (explicit deny or no match)
    pub denied_decisions: u64,

    /// Mutations that changed state and were persisted
    pub mutations_applied: u64,

    /// Mutations that were already in effect
    pub mutations_noop: u64,

    /// Mutations rejected or rolled back
    pub mutations_failed: u64,

    /// Pending snapshots discarded after a persistence failure
    pub rollbacks: u64,

    /// Adapter calls retried after a transient failure
    pub persist_retries: u64,

    /// Successful full loads
    pub loads: u64,
}

impl EngineMetrics {
    pub fn total_requests(&self) -> u64 {
        self.allowed_decisions + self.denied_decisions
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Metrics collector with Prometheus-compatible export
#[derive(Debug, Default)]
pub struct MetricsCollector {
    allowed: AtomicU64,
    denied: AtomicU64,
    applied: AtomicU64,
    noop: AtomicU64,
    failed: AtomicU64,
    rollbacks: AtomicU64,
    retries: AtomicU64,
    loads: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an enforcement decision
    pub fn record_decision(&self, allowed: bool) {
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a mutation that reached the adapter or was a no-op
    pub fn record_mutation(&self, changed: bool) {
        if changed {
            self.applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.noop.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        EngineMetrics {
            allowed_decisions: self.allowed.load(Ordering::Relaxed),
            denied_decisions: self.denied.load(Ordering::Relaxed),
            mutations_applied: self.applied.load(Ordering::Relaxed),
            mutations_noop: self.noop.load(Ordering::Relaxed),
            mutations_failed: self.failed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            persist_retries: self.retries.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.allowed,
            &self.denied,
            &self.applied,
            &self.noop,
            &self.failed,
            &self.rollbacks,
            &self.retries,
            &self.loads,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP authz_requests_total Total number of enforcement requests
# TYPE authz_requests_total counter
authz_requests_total {}

# HELP authz_allowed_total Number of allowed decisions
# TYPE authz_allowed_total counter
authz_allowed_total {}

# HELP authz_denied_total Number of denied decisions
# TYPE authz_denied_total counter
authz_denied_total {}

# HELP authz_mutations_total Policy mutations by outcome
# TYPE authz_mutations_total counter
authz_mutations_total{{outcome="applied"}} {}
authz_mutations_total{{outcome="noop"}} {}
authz_mutations_total{{outcome="failed"}} {}

# HELP authz_rollbacks_total Snapshots discarded after a persistence failure
# TYPE authz_rollbacks_total counter
authz_rollbacks_total {}

# HELP authz_persist_retries_total Adapter calls retried
# TYPE authz_persist_retries_total counter
authz_persist_retries_total {}

# HELP authz_loads_total Successful full policy loads
# TYPE authz_loads_total counter
authz_loads_total {}
"#,
            metrics.total_requests(),
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.mutations_applied,
            metrics.mutations_noop,
            metrics.mutations_failed,
            metrics.rollbacks,
            metrics.persist_retries,
            metrics.loads,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let collector = MetricsCollector::new();
        let metrics = collector.get_metrics();

        assert_eq!(metrics, EngineMetrics::default());
        assert_eq!(metrics.allow_rate(), 0.0);
    }

    #[test]
    fn test_record_decision() {
        let collector = MetricsCollector::new();

        collector.record_decision(true);
        collector.record_decision(false);
        collector.record_decision(true);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.allowed_decisions, 2);
        assert_eq!(metrics.denied_decisions, 1);
        assert!((metrics.allow_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_record_mutations() {
        let collector = MetricsCollector::new();

        collector.record_mutation(true);
        collector.record_mutation(false);
        collector.record_failure();
        collector.record_rollback();
        collector.record_retry();
        collector.record_retry();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.mutations_applied, 1);
        assert_eq!(metrics.mutations_noop, 1);
        assert_eq!(metrics.mutations_failed, 1);
        assert_eq!(metrics.rollbacks, 1);
        assert_eq!(metrics.persist_retries, 2);
    }

    #[test]
    fn test_prometheus_export() {
        let collector = MetricsCollector::new();

        collector.record_decision(true);
        collector.record_mutation(true);

        let prometheus = collector.export_prometheus();
        assert!(prometheus.contains("authz_requests_total 1"));
        assert!(prometheus.contains("authz_allowed_total 1"));
        assert!(prometheus.contains("authz_mutations_total{outcome=\"applied\"} 1"));
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();

        collector.record_decision(true);
        collector.record_load();
        collector.reset();

        assert_eq!(collector.get_metrics(), EngineMetrics::default());
    }
}
