//! Policy evaluator client
//!
//! Posts `{"input": <PolicyRequest>}` to an OPA-style data endpoint and
//! returns the `result` object as a [`Verdict`]. Any transport failure or
//! non-success status is fatal for the run.

use crate::error::{PipelineError, Result};
use crate::models::PolicyRequest;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Approval set returned by the evaluator, keyed by encoded action descriptors.
///
/// Entries are held in a sorted map, so iteration is always in canonical
/// (raw key) order no matter how the evaluator ordered them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verdict(BTreeMap<String, Value>);

impl Verdict {
    /// Interpret a full response body. A missing or non-object `result`
    /// means nothing was approved.
    pub fn from_response(body: Value) -> Self {
        match body {
            Value::Object(mut map) => match map.remove("result") {
                Some(Value::Object(result)) => result.into_iter().collect(),
                Some(other) => {
                    warn!(result = %other, "Policy result is not an object, treating as empty verdict");
                    Self::default()
                }
                None => Self::default(),
            },
            _ => Self::default(),
        }
    }

    /// Entries in canonical order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Verdict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Serialize)]
struct EvaluationInput<'a> {
    input: &'a PolicyRequest,
}

/// Trait for policy decision endpoints
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, request: &PolicyRequest) -> Result<Verdict>;
}

/// HTTP client for an OPA data API endpoint
pub struct OpaClient {
    client: Client,
    url: Url,
}

impl OpaClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PipelineError::Config(format!("invalid policy URL {:?}: {}", url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }

    fn failure(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::PolicyCallFailure {
            url: self.url.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for OpaClient {
    async fn evaluate(&self, request: &PolicyRequest) -> Result<Verdict> {
        debug!(url = %self.url, nodes = request.nodes.len(), "Submitting policy request");

        let response = self
            .client
            .post(self.url.clone())
            .json(&EvaluationInput { input: request })
            .send()
            .await
            .map_err(|e| self.failure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("evaluator returned {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.failure(format!("malformed response: {}", e)))?;

        Ok(Verdict::from_response(body))
    }
}
