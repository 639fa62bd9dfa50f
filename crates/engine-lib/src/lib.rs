//! Closed-loop resource allocation engine
//!
//! This crate provides the decision pipeline:
//! - Metric acquisition from a Prometheus-compatible backend
//! - Policy request construction and OPA-style evaluation
//! - Tolerant decoding of policy verdicts into actions
//! - Table-driven allocation resolution and artifact output
//! - Configuration, error taxonomy and observability

pub mod config;
pub mod decoder;
pub mod error;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod resolver;
pub mod sink;
pub mod source;

pub use self::config::EngineConfig;
pub use decoder::{Decoded, VerdictDecoder};
pub use error::{PipelineError, Stage};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{decide, Pipeline, PipelineBuilder, RunFailure, RunReport};
pub use policy::{OpaClient, PolicyEvaluator, Verdict};
pub use request::PolicyRequestBuilder;
pub use resolver::{AllocationResolver, AllocationTable, Resolution, ResourceValues, UnspecifiedTarget};
pub use sink::{to_artifact, ArtifactValue, ConfigArtifact, ConfigSink};
pub use source::{fetch_signals, MetricSource, PrometheusConfig, PrometheusSource, SampleSet};
