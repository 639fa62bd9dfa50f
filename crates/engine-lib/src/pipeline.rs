//! One closed-loop allocation run
//!
//! fetch metrics -> build policy request -> evaluate -> decode verdict ->
//! resolve allocations -> write artifact. Stages run strictly in order and
//! a fatal error at any stage stops the run before the artifact is touched.

use crate::config::EngineConfig;
use crate::decoder::{Decoded, VerdictDecoder};
use crate::error::PipelineError;
use crate::models::{Action, Allocation, NodeMap, PolicyRequest, Recovered, Variant};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::policy::{OpaClient, PolicyEvaluator, Verdict};
use crate::request::{PolicyRequestBuilder, DEFAULT_SOURCE_TAG};
use crate::resolver::{AllocationResolver, AllocationTable, Resolution};
use crate::sink::ConfigSink;
use crate::source::{fetch_signals, MetricSource, PrometheusSource};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Everything a successful run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub variant: Variant,
    pub request: PolicyRequest,
    pub verdict: Verdict,
    pub actions: Vec<Action>,
    pub migrations: BTreeSet<String>,
    pub allocations: BTreeMap<String, Allocation>,
    pub recovered: Vec<Recovered>,
    /// Artifact path, absent on dry runs
    pub artifact: Option<PathBuf>,
}

/// A fatal run error plus whatever had been exchanged with the evaluator
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    pub request: Option<PolicyRequest>,
    pub verdict: Option<Verdict>,
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Decode a verdict and resolve allocations for the configured nodes
pub fn decide(verdict: &Verdict, nodes: &NodeMap, table: AllocationTable) -> (Decoded, Resolution) {
    let decoded = VerdictDecoder::new(nodes).decode(verdict);
    let resolution = AllocationResolver::new(table).resolve(&decoded.actions, nodes);
    (decoded, resolution)
}

pub struct Pipeline {
    variant: Variant,
    nodes: NodeMap,
    source: Arc<dyn MetricSource>,
    policy: Arc<dyn PolicyEvaluator>,
    policy_label: String,
    builder: PolicyRequestBuilder,
    table: AllocationTable,
    output: Option<PathBuf>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    /// Wire the Prometheus source and OPA client described by `config`
    pub fn from_config(config: &EngineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let policy_url = config.policy_url();
        let source = PrometheusSource::new(config.prometheus())?;
        let policy = OpaClient::new(&policy_url, config.policy_timeout())?;

        PipelineBuilder::new(config.variant)
            .nodes(config.nodes.clone())
            .source(Arc::new(source))
            .policy(Arc::new(policy), policy_url)
            .source_tag(config.source_tag.clone())
            .table(config.allocation_table())
            .output(config.artifact_target())
            .build()
    }

    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        self.logger.log_run_started(self.nodes.len(), &self.policy_label);
        self.metrics.set_nodes_configured(self.nodes.len() as i64);

        let instances: Vec<String> = self.nodes.values().cloned().collect();

        let started = Instant::now();
        let samples = fetch_signals(self.source.as_ref(), self.variant.signals(), &instances)
            .await
            .map_err(|e| self.fail(e, None, None))?;
        self.metrics
            .observe_stage("metrics", started.elapsed().as_secs_f64());

        let mut recovered: Vec<Recovered> = samples
            .iter()
            .flat_map(|set| set.recovered().iter().cloned())
            .collect();

        let request = self.builder.build(&samples, &self.nodes);

        let started = Instant::now();
        let verdict = match self.policy.evaluate(&request).await {
            Ok(verdict) => verdict,
            Err(e) => return Err(self.fail(e, Some(request), None)),
        };
        self.metrics
            .observe_stage("policy", started.elapsed().as_secs_f64());

        let (decoded, resolution) = decide(&verdict, &self.nodes, self.table.clone());
        recovered.extend(decoded.recovered);

        for event in &recovered {
            self.logger.log_recovered(event);
            self.metrics.inc_recovered(event);
        }
        for action in &decoded.actions {
            self.metrics.inc_action(action.kind.as_str());
        }
        for node in &resolution.migrations {
            self.logger.log_migration(node);
        }
        for allocation in resolution.allocations.values() {
            self.logger.log_allocation(allocation);
        }

        if let Some(path) = &self.output {
            let started = Instant::now();
            if let Err(e) = ConfigSink::write(path, &resolution.allocations) {
                return Err(self.fail(e, Some(request), Some(verdict)));
            }
            self.metrics
                .observe_stage("artifact", started.elapsed().as_secs_f64());
            self.logger
                .log_artifact_written(path, resolution.allocations.len());
        }

        self.metrics.inc_run(self.variant, "success");

        Ok(RunReport {
            variant: self.variant,
            request,
            verdict,
            actions: decoded.actions,
            migrations: resolution.migrations,
            allocations: resolution.allocations,
            recovered,
            artifact: self.output.clone(),
        })
    }

    fn fail(
        &self,
        error: PipelineError,
        request: Option<PolicyRequest>,
        verdict: Option<Verdict>,
    ) -> RunFailure {
        self.logger.log_run_failed(&error);
        self.metrics
            .inc_run(self.variant, &format!("{}_failure", error.stage()));
        RunFailure {
            error,
            request,
            verdict,
        }
    }
}

/// Builder for a [`Pipeline`]
pub struct PipelineBuilder {
    variant: Variant,
    nodes: NodeMap,
    source: Option<Arc<dyn MetricSource>>,
    policy: Option<(Arc<dyn PolicyEvaluator>, String)>,
    source_tag: String,
    table: Option<AllocationTable>,
    output: Option<PathBuf>,
}

impl PipelineBuilder {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            nodes: NodeMap::new(),
            source: None,
            policy: None,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            table: None,
            output: None,
        }
    }

    pub fn nodes(mut self, nodes: NodeMap) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the evaluator and the label used for it in logs
    pub fn policy(mut self, policy: Arc<dyn PolicyEvaluator>, label: impl Into<String>) -> Self {
        self.policy = Some((policy, label.into()));
        self
    }

    pub fn source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    /// Override the variant's default allocation table
    pub fn table(mut self, table: AllocationTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Artifact path; `None` computes allocations without writing
    pub fn output(mut self, path: Option<PathBuf>) -> Self {
        self.output = path;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let source = self
            .source
            .ok_or_else(|| PipelineError::Config("metric source is required".to_string()))?;
        let (policy, policy_label) = self
            .policy
            .ok_or_else(|| PipelineError::Config("policy evaluator is required".to_string()))?;
        if self.nodes.is_empty() {
            return Err(PipelineError::Config("no nodes configured".to_string()));
        }

        Ok(Pipeline {
            variant: self.variant,
            nodes: self.nodes,
            source,
            policy,
            policy_label,
            builder: PolicyRequestBuilder::new(self.source_tag),
            table: self
                .table
                .unwrap_or_else(|| AllocationTable::for_variant(self.variant)),
            output: self.output,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new(self.variant),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{ActionKind, Signal, SignalValue};
    use crate::source::{async_trait, SampleSet};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock source returning fixed values, or failing aggregate queries
    struct MockSource {
        values: BTreeMap<(Signal, String), SignalValue>,
        fail: bool,
    }

    #[async_trait]
    impl MetricSource for MockSource {
        async fn fetch(&self, signal: Signal, instances: &[String]) -> Result<SampleSet> {
            if self.fail {
                return Err(PipelineError::MetricBackendFailure {
                    query: format!("{:?}", signal),
                    reason: "connection refused".to_string(),
                });
            }
            let mut set = SampleSet::new(signal);
            for instance in instances {
                match self.values.get(&(signal, instance.clone())) {
                    Some(value) => set.insert(instance.clone(), *value),
                    None if signal == Signal::Liveness => set.mark_gap(instance.clone(), "empty"),
                    None => {}
                }
            }
            set.fill_unknown(instances);
            Ok(set)
        }
    }

    /// Mock evaluator that records requests and replays a verdict
    struct MockEvaluator {
        verdict: Option<Verdict>,
        calls: AtomicUsize,
        last: Mutex<Option<PolicyRequest>>,
    }

    impl MockEvaluator {
        fn answering(entries: &[(&str, serde_json::Value)]) -> Self {
            Self {
                verdict: Some(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.clone()))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                verdict: None,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PolicyEvaluator for MockEvaluator {
        async fn evaluate(&self, request: &PolicyRequest) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            self.verdict
                .clone()
                .ok_or_else(|| PipelineError::PolicyCallFailure {
                    url: "mock".to_string(),
                    reason: "unavailable".to_string(),
                })
        }
    }

    fn nodes() -> NodeMap {
        [
            ("vm1", "172.27.50.159:9100"),
            ("vm2", "172.27.50.160:9100"),
            ("vm3", "172.27.50.161:9100"),
        ]
        .into_iter()
        .map(|(n, i)| (n.to_string(), i.to_string()))
        .collect()
    }

    fn pipeline(
        variant: Variant,
        source: MockSource,
        evaluator: Arc<MockEvaluator>,
    ) -> Pipeline {
        PipelineBuilder::new(variant)
            .nodes(nodes())
            .source(Arc::new(source))
            .policy(evaluator, "mock")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_utilization_run_scales_memory() {
        let mut values = BTreeMap::new();
        values.insert(
            (Signal::CpuPercent, "172.27.50.159:9100".to_string()),
            SignalValue::Percent(92.0),
        );
        let evaluator = Arc::new(MockEvaluator::answering(&[(
            r#"{"node":"vm2","action":"scale_up","resource":"memory"}"#,
            json!(true),
        )]));

        let report = pipeline(
            Variant::Utilization,
            MockSource { values, fail: false },
            evaluator.clone(),
        )
        .run()
        .await
        .unwrap();

        let sent = evaluator.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.nodes["vm1"]["cpu"], SignalValue::Percent(92.0));
        assert_eq!(sent.nodes["vm1"]["memory"], SignalValue::Percent(0.0));

        assert_eq!(report.allocations["vm2"].memory, "4096Mi");
        assert_eq!(report.allocations["vm2"].cpu, 1);
        assert_eq!(report.allocations.len(), 3);
        assert!(report.artifact.is_none());
    }

    #[tokio::test]
    async fn test_failover_run_records_migration_and_boost() {
        let mut values = BTreeMap::new();
        values.insert(
            (Signal::Liveness, "172.27.50.159:9100".to_string()),
            SignalValue::Status(1),
        );
        values.insert(
            (Signal::Liveness, "172.27.50.160:9100".to_string()),
            SignalValue::Status(1),
        );
        let evaluator = Arc::new(MockEvaluator::answering(&[
            (r#"{"node":"172.27.50.161","action":"migrate_workloads"}"#, json!(true)),
            (r#"{"node":"172.27.50.159","action":"scale_up"}"#, json!(true)),
            (r#"{"node":"172.27.50.160","action":"scale_up"}"#, json!(false)),
        ]));

        let report = pipeline(
            Variant::Failover,
            MockSource { values, fail: false },
            evaluator,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.request.nodes["vm3"]["status"], SignalValue::Status(0));
        assert!(report.migrations.contains("vm3"));
        assert_eq!(report.allocations["vm1"].cpu, 2);
        assert_eq!(report.allocations["vm1"].memory, "4096Mi");
        assert_eq!(report.allocations["vm2"].cpu, 1);
        assert_eq!(report.allocations["vm3"].cpu, 1);
        assert_eq!(
            report
                .actions
                .iter()
                .filter(|a| a.kind == ActionKind::ScaleUp)
                .count(),
            1
        );
        assert!(report
            .recovered
            .iter()
            .any(|r| matches!(r, Recovered::TransientMetricGap { instance, .. } if instance == "172.27.50.161:9100")));
    }

    #[tokio::test]
    async fn test_metric_failure_aborts_before_policy_call() {
        let evaluator = Arc::new(MockEvaluator::answering(&[]));
        let failure = pipeline(
            Variant::Utilization,
            MockSource {
                values: BTreeMap::new(),
                fail: true,
            },
            evaluator.clone(),
        )
        .run()
        .await
        .unwrap_err();

        assert_eq!(failure.exit_code(), 2);
        assert!(failure.request.is_none());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_policy_failure_carries_request() {
        let failure = pipeline(
            Variant::Utilization,
            MockSource {
                values: BTreeMap::new(),
                fail: false,
            },
            Arc::new(MockEvaluator::failing()),
        )
        .run()
        .await
        .unwrap_err();

        assert_eq!(failure.exit_code(), 3);
        assert_eq!(failure.request.unwrap().nodes.len(), 3);
        assert!(failure.verdict.is_none());
    }

    #[test]
    fn test_builder_requires_collaborators() {
        assert!(PipelineBuilder::new(Variant::Failover)
            .nodes(nodes())
            .build()
            .is_err());
    }

    #[test]
    fn test_decide_last_wins_in_key_order() {
        let verdict: Verdict = vec![
            (
                r#"{"node":"vm1","action":"scale_up","resource":"cpu"}"#.to_string(),
                json!(true),
            ),
            (
                r#"{"node":"vm1","action":"scale_down","resource":"cpu"}"#.to_string(),
                json!(true),
            ),
        ]
        .into_iter()
        .collect();

        let (decoded, resolution) = decide(&verdict, &nodes(), AllocationTable::utilization());

        // "scale_down" sorts before "scale_up", so scale_up is applied last
        assert_eq!(decoded.actions.last().unwrap().kind, ActionKind::ScaleUp);
        assert_eq!(resolution.allocations["vm1"].cpu, 4);
    }
}
