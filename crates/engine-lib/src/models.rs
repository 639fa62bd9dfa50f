//! Core data models for the decision pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Static mapping of logical node name to monitoring instance (`ip:port`)
pub type NodeMap = BTreeMap<String, String>;

/// Which closed-loop variant a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Liveness-driven: decide which nodes are down and which survivors to boost
    Failover,
    /// Utilization-driven: per-node scale-up/scale-down from CPU/memory percent
    #[default]
    Utilization,
}

impl Variant {
    /// Signals fetched from the monitoring backend for this variant
    pub fn signals(&self) -> &'static [Signal] {
        match self {
            Variant::Failover => &[Signal::Liveness],
            Variant::Utilization => &[Signal::CpuPercent, Signal::MemoryPercent],
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Failover => write!(f, "failover"),
            Variant::Utilization => write!(f, "utilization"),
        }
    }
}

/// A health/utilization signal queried per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Liveness,
    CpuPercent,
    MemoryPercent,
}

impl Signal {
    /// Field name used for this signal inside the policy request
    pub fn request_key(&self) -> &'static str {
        match self {
            Signal::Liveness => "status",
            Signal::CpuPercent => "cpu",
            Signal::MemoryPercent => "memory",
        }
    }

    /// Value substituted when an instance has no sample: down, or idle
    pub fn default_value(&self) -> SignalValue {
        match self {
            Signal::Liveness => SignalValue::Status(0),
            Signal::CpuPercent | Signal::MemoryPercent => SignalValue::Percent(0.0),
        }
    }
}

/// One sampled value. Liveness is `0`/`1`, utilization is a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Status(u8),
    Percent(f64),
}

impl SignalValue {
    /// Percentages are reported with two decimals
    pub fn rounded(self) -> Self {
        match self {
            SignalValue::Percent(p) => SignalValue::Percent((p * 100.0).round() / 100.0),
            other => other,
        }
    }
}

/// Per-node signal values, keyed by request field name
pub type NodeSignals = BTreeMap<String, SignalValue>;

/// Request-time provenance attached to every policy request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub timestamp: String,
    pub source: String,
}

/// Normalized payload submitted to the policy evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub nodes: BTreeMap<String, NodeSignals>,
    pub context: RequestContext,
}

/// Decoded action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp,
    ScaleDown,
    MigrateWorkloads,
    None,
    Unrecognized,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ScaleUp => "scale_up",
            ActionKind::ScaleDown => "scale_down",
            ActionKind::MigrateWorkloads => "migrate_workloads",
            ActionKind::None => "none",
            ActionKind::Unrecognized => "unrecognized",
        }
    }
}

/// Resource an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    /// No resource hint in the verdict key; the allocation table decides
    Unspecified,
}

/// Decoded, classified unit of policy intent targeting one configured node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub node: String,
    pub kind: ActionKind,
    pub resource: ResourceKind,
    /// Raw action string as sent by the evaluator
    pub raw_action: String,
}

/// Final resolved CPU/memory assignment for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub node: String,
    pub cpu: u32,
    pub memory: String,
}

/// Recoverable events absorbed during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recovered {
    /// Single-instance liveness miss, instance treated as down
    TransientMetricGap { instance: String, reason: String },
    /// Instance absent from an aggregate result, treated as idle
    UnknownInstance { instance: String, signal: Signal },
    /// Verdict key could not be decoded into an action
    VerdictDecodeSkip { key: String, reason: String },
    /// Action named a node that is not configured
    UnknownTargetSkip { node: String, key: String },
}

impl Recovered {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Recovered::TransientMetricGap { .. } => "transient_metric_gap",
            Recovered::UnknownInstance { .. } => "unknown_instance",
            Recovered::VerdictDecodeSkip { .. } => "verdict_decode_skip",
            Recovered::UnknownTargetSkip { .. } => "unknown_target_skip",
        }
    }
}

impl fmt::Display for Recovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovered::TransientMetricGap { instance, reason } => {
                write!(f, "{} treated as down: {}", instance, reason)
            }
            Recovered::UnknownInstance { instance, signal } => {
                write!(f, "{} missing from {:?} result, treated as idle", instance, signal)
            }
            Recovered::VerdictDecodeSkip { key, reason } => {
                write!(f, "skipped verdict key {:?}: {}", key, reason)
            }
            Recovered::UnknownTargetSkip { node, key } => {
                write!(f, "skipped action for unknown node {:?} (key {:?})", node, key)
            }
        }
    }
}
