//! Policy request construction
//!
//! Re-keys instance samples by logical node name. Every configured node is
//! present in every request; a missing sample falls back to the signal's
//! default (down for liveness, idle for utilization).

use crate::models::{NodeMap, NodeSignals, PolicyRequest, RequestContext};
use crate::source::SampleSet;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Provenance tag attached to requests built from Prometheus samples
pub const DEFAULT_SOURCE_TAG: &str = "prometheus";

pub struct PolicyRequestBuilder {
    source_tag: String,
}

impl Default for PolicyRequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TAG)
    }
}

impl PolicyRequestBuilder {
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
        }
    }

    /// Build a request stamped with the current time
    pub fn build(&self, samples: &[SampleSet], nodes: &NodeMap) -> PolicyRequest {
        self.build_at(samples, nodes, Utc::now())
    }

    pub fn build_at(
        &self,
        samples: &[SampleSet],
        nodes: &NodeMap,
        at: DateTime<Utc>,
    ) -> PolicyRequest {
        let nodes = nodes
            .iter()
            .map(|(node, instance)| {
                let signals: NodeSignals = samples
                    .iter()
                    .map(|set| {
                        let value = set.value_or_default(instance).rounded();
                        (set.signal().request_key().to_string(), value)
                    })
                    .collect();
                (node.clone(), signals)
            })
            .collect::<BTreeMap<_, _>>();

        PolicyRequest {
            nodes,
            context: RequestContext {
                timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
                source: self.source_tag.clone(),
            },
        }
    }
}
