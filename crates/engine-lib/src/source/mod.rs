//! Metric acquisition from the monitoring backend
//!
//! A [`MetricSource`] answers one [`Signal`] for a set of instances. Liveness
//! misses are absorbed per instance (the instance counts as down), while a
//! failed aggregate query aborts the run because no safe default exists for
//! a whole missing dataset.

mod prometheus;


pub use self::prometheus::{PrometheusConfig, PrometheusSource};

use crate::error::Result;
use crate::models::{Recovered, Signal, SignalValue};
use std::collections::BTreeMap;

pub use async_trait::async_trait;

/// Values for one signal keyed by instance identity
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    signal: Signal,
    values: BTreeMap<String, SignalValue>,
    recovered: Vec<Recovered>,
}

impl SampleSet {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            values: BTreeMap::new(),
            recovered: Vec::new(),
        }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn insert(&mut self, instance: impl Into<String>, value: SignalValue) {
        self.values.insert(instance.into(), value);
    }

    /// Record a per-instance query miss; the instance reads as the signal default
    pub fn mark_gap(&mut self, instance: impl Into<String>, reason: impl Into<String>) {
        let instance = instance.into();
        self.values.insert(instance.clone(), self.signal.default_value());
        self.recovered.push(Recovered::TransientMetricGap {
            instance,
            reason: reason.into(),
        });
    }

    /// Default every expected instance absent from the result, flagging it as unknown
    pub fn fill_unknown(&mut self, instances: &[String]) {
        for instance in instances {
            if !self.values.contains_key(instance) {
                self.values
                    .insert(instance.clone(), self.signal.default_value());
                self.recovered.push(Recovered::UnknownInstance {
                    instance: instance.clone(),
                    signal: self.signal,
                });
            }
        }
    }

    pub fn get(&self, instance: &str) -> Option<SignalValue> {
        self.values.get(instance).copied()
    }

    pub fn value_or_default(&self, instance: &str) -> SignalValue {
        self.get(instance)
            .unwrap_or_else(|| self.signal.default_value())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn recovered(&self) -> &[Recovered] {
        &self.recovered
    }
}

/// Trait for monitoring backends
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch one signal for the given instances
    async fn fetch(&self, signal: Signal, instances: &[String]) -> Result<SampleSet>;
}

/// Fetch every signal a variant needs.
///
/// Two independent signals (cpu and memory) are queried concurrently and
/// joined; both must succeed before the caller builds a request.
pub async fn fetch_signals(
    source: &dyn MetricSource,
    signals: &[Signal],
    instances: &[String],
) -> Result<Vec<SampleSet>> {
    match signals {
        [first, second] => {
            let (a, b) = tokio::try_join!(
                source.fetch(*first, instances),
                source.fetch(*second, instances)
            )?;
            Ok(vec![a, b])
        }
        _ => {
            let mut sets = Vec::with_capacity(signals.len());
            for signal in signals {
                sets.push(source.fetch(*signal, instances).await?);
            }
            Ok(sets)
        }
    }
}
