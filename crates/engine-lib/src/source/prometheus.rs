//! Prometheus HTTP query API backend

use super::{async_trait, MetricSource, SampleSet};
use crate::error::{PipelineError, Result};
use crate::models::{Signal, SignalValue};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Connection settings for the Prometheus backend
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Base URL, e.g. "http://localhost:9090"
    pub base_url: String,
    /// Rate window for the CPU expression, e.g. "1m"
    pub window: String,
    /// Bound on each per-instance liveness query
    pub liveness_timeout: Duration,
    /// Bound on each aggregate utilization query
    pub query_timeout: Duration,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            window: "1m".to_string(),
            liveness_timeout: Duration::from_secs(6),
            query_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Series>,
}

/// One instant-vector series: `{metric: {labels}, value: [ts, "v"]}`
#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<(serde_json::Value, String)>,
}

impl Series {
    fn instance(&self) -> Option<&str> {
        self.metric.get("instance").map(String::as_str)
    }

    fn sample(&self) -> Option<f64> {
        let (_, raw) = self.value.as_ref()?;
        raw.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

pub struct PrometheusSource {
    client: Client,
    query_url: Url,
    window: String,
    liveness_timeout: Duration,
    query_timeout: Duration,
}

impl PrometheusSource {
    pub fn new(config: PrometheusConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url).map_err(|e| {
            PipelineError::Config(format!("invalid monitoring URL {:?}: {}", config.base_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base
            .join("api/v1/query")
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let client = Client::builder()
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            query_url,
            window: config.window,
            liveness_timeout: config.liveness_timeout,
            query_timeout: config.query_timeout,
        })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    /// PromQL expression for a signal. Liveness is per instance; the
    /// utilization expressions aggregate across all instances.
    pub fn expression(&self, signal: Signal, instance: Option<&str>) -> String {
        match signal {
            Signal::Liveness => format!("up{{instance=\"{}\"}}", instance.unwrap_or_default()),
            Signal::CpuPercent => format!(
                "100 * (1 - avg by(instance) (rate(node_cpu_seconds_total{{mode=\"idle\"}}[{}])))",
                self.window
            ),
            Signal::MemoryPercent => {
                "100 * (1 - (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes))"
                    .to_string()
            }
        }
    }

    async fn query(&self, expr: &str, timeout: Duration) -> std::result::Result<Vec<Series>, String> {
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", expr)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("backend returned {}: {}", status, body));
        }

        let envelope: QueryEnvelope = response
            .json()
            .await
            .map_err(|e| format!("malformed response: {}", e))?;

        if envelope.status != "success" {
            return Err(format!(
                "backend status {:?}: {}",
                envelope.status,
                envelope.error.unwrap_or_default()
            ));
        }

        Ok(envelope.data.map(|d| d.result).unwrap_or_default())
    }

    async fn fetch_liveness(&self, instances: &[String]) -> SampleSet {
        let mut set = SampleSet::new(Signal::Liveness);

        for instance in instances {
            let expr = self.expression(Signal::Liveness, Some(instance));
            match self.query(&expr, self.liveness_timeout).await {
                Ok(series) => match series.first().map(Series::sample) {
                    Some(Some(value)) => {
                        let up = if value.trunc() == 1.0 { 1 } else { 0 };
                        debug!(instance = %instance, up = up, "Liveness sampled");
                        set.insert(instance.clone(), SignalValue::Status(up));
                    }
                    Some(None) => set.mark_gap(instance.clone(), "unparseable sample value"),
                    None => set.mark_gap(instance.clone(), "empty result set"),
                },
                Err(reason) => {
                    warn!(instance = %instance, reason = %reason, "Liveness query failed, treating instance as down");
                    set.mark_gap(instance.clone(), reason);
                }
            }
        }

        set
    }

    async fn fetch_aggregate(&self, signal: Signal, instances: &[String]) -> Result<SampleSet> {
        let expr = self.expression(signal, None);
        let series = self
            .query(&expr, self.query_timeout)
            .await
            .map_err(|reason| PipelineError::MetricBackendFailure {
                query: expr.clone(),
                reason,
            })?;

        let mut set = SampleSet::new(signal);
        for s in &series {
            match (s.instance(), s.sample()) {
                (Some(instance), Some(value)) => {
                    set.insert(instance, SignalValue::Percent(value));
                }
                _ => debug!(signal = ?signal, labels = ?s.metric, "Ignoring series without instance or value"),
            }
        }

        set.fill_unknown(instances);

        Ok(set)
    }
}

#[async_trait]
impl MetricSource for PrometheusSource {
    async fn fetch(&self, signal: Signal, instances: &[String]) -> Result<SampleSet> {
        match signal {
            Signal::Liveness => Ok(self.fetch_liveness(instances).await),
            Signal::CpuPercent | Signal::MemoryPercent => {
                self.fetch_aggregate(signal, instances).await
            }
        }
    }
}
