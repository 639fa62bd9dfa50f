//! Observability for pipeline runs
//!
//! Provides:
//! - Prometheus metrics (runs by outcome, recovered events, approved actions, stage latency)
//! - Structured logging of run events with tracing

use crate::error::PipelineError;
use crate::models::{Allocation, Recovered, Variant};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for stage latency (in seconds); stages are HTTP round trips
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    runs: IntCounterVec,
    recovered: IntCounterVec,
    actions: IntCounterVec,
    stage_latency_seconds: HistogramVec,
    nodes_configured: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            runs: register_int_counter_vec!(
                "palloc_runs_total",
                "Pipeline runs by variant and outcome",
                &["variant", "outcome"]
            )
            .expect("Failed to register runs_total"),

            recovered: register_int_counter_vec!(
                "palloc_recovered_events_total",
                "Recoverable events absorbed during runs",
                &["kind"]
            )
            .expect("Failed to register recovered_events_total"),

            actions: register_int_counter_vec!(
                "palloc_approved_actions_total",
                "Approved actions decoded from policy verdicts",
                &["kind"]
            )
            .expect("Failed to register approved_actions_total"),

            stage_latency_seconds: register_histogram_vec!(
                "palloc_stage_latency_seconds",
                "Time spent in each pipeline stage",
                &["stage"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_latency_seconds"),

            nodes_configured: register_int_gauge!(
                "palloc_nodes_configured",
                "Number of nodes subject to allocation"
            )
            .expect("Failed to register nodes_configured"),
        }
    }
}

/// Lightweight handle to the global pipeline metrics.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_run(&self, variant: Variant, outcome: &str) {
        let variant = variant.to_string();
        self.inner()
            .runs
            .with_label_values(&[variant.as_str(), outcome])
            .inc();
    }

    pub fn inc_recovered(&self, recovered: &Recovered) {
        self.inner()
            .recovered
            .with_label_values(&[recovered.kind()])
            .inc();
    }

    pub fn inc_action(&self, kind: &str) {
        self.inner().actions.with_label_values(&[kind]).inc();
    }

    pub fn observe_stage(&self, stage: &str, duration_secs: f64) {
        self.inner()
            .stage_latency_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn set_nodes_configured(&self, count: i64) {
        self.inner().nodes_configured.set(count);
    }

    /// Render every registered metric in text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for pipeline events
#[derive(Clone)]
pub struct StructuredLogger {
    variant: Variant,
}

impl StructuredLogger {
    pub fn new(variant: Variant) -> Self {
        Self { variant }
    }

    pub fn log_run_started(&self, nodes: usize, policy_url: &str) {
        info!(
            event = "run_started",
            variant = %self.variant,
            nodes = nodes,
            policy_url = %policy_url,
            "Allocation run started"
        );
    }

    pub fn log_recovered(&self, recovered: &Recovered) {
        warn!(
            event = "recovered",
            variant = %self.variant,
            kind = recovered.kind(),
            detail = %recovered,
            "Recovered from partial information"
        );
    }

    pub fn log_migration(&self, node: &str) {
        warn!(
            event = "migration_requested",
            variant = %self.variant,
            node = %node,
            "Policy approved workload migration"
        );
    }

    pub fn log_allocation(&self, allocation: &Allocation) {
        info!(
            event = "allocation_resolved",
            variant = %self.variant,
            node = %allocation.node,
            cpu = allocation.cpu,
            memory = %allocation.memory,
            "Allocation resolved"
        );
    }

    pub fn log_artifact_written(&self, path: &Path, nodes: usize) {
        info!(
            event = "artifact_written",
            variant = %self.variant,
            path = %path.display(),
            nodes = nodes,
            "Allocation artifact written"
        );
    }

    pub fn log_run_failed(&self, err: &PipelineError) {
        error!(
            event = "run_failed",
            variant = %self.variant,
            stage = %err.stage(),
            error = %err,
            "Allocation run failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_render() {
        let metrics = PipelineMetrics::new();
        metrics.inc_run(Variant::Utilization, "success");
        metrics.inc_action("scale_up");
        metrics.observe_stage("policy", 0.042);
        metrics.set_nodes_configured(3);

        let text = metrics.render();
        assert!(text.contains("palloc_runs_total"));
        assert!(text.contains("palloc_nodes_configured"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new(Variant::Failover);
        assert_eq!(logger.variant, Variant::Failover);
    }
}
