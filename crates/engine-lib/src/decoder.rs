//! Verdict decoding
//!
//! The evaluator returns `{ "<encoded descriptor>": <approval>, ... }` where
//! each key is, by convention only, a serialized JSON object
//! `{"node": .., "action": .., "resource": ..}`. Nothing about that is
//! trusted: unapproved entries, keys that do not decode and actions that
//! name an unconfigured node are all skipped and reported as
//! [`Recovered`] events instead of failing the run.
//!
//! Action and resource strings are classified leniently:
//! - an action containing `up` is a scale-up, containing `down` a
//!   scale-down, exactly `migrate_workloads` a migration, anything else
//!   `none`/`unrecognized`;
//! - a `resource` of `memory`, or an action containing `mem`, targets
//!   memory. This is a substring heuristic and will misread actions such as
//!   `something_memorable` or `cleanup`.

use crate::models::{Action, ActionKind, NodeMap, Recovered, ResourceKind};
use crate::policy::Verdict;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Result of decoding one verdict
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Approved actions for configured nodes, in canonical key order
    pub actions: Vec<Action>,
    pub recovered: Vec<Recovered>,
}

#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    #[serde(default)]
    node: Value,
    #[serde(default)]
    action: Value,
    #[serde(default)]
    resource: Value,
}

pub struct VerdictDecoder {
    /// Accepted target spellings (node name, instance, instance host) to node name
    targets: HashMap<String, String>,
}

impl VerdictDecoder {
    /// Build the alias table for `nodes`. An instance or host spelling shared
    /// by several nodes is ambiguous and is not accepted as a target.
    pub fn new(nodes: &NodeMap) -> Self {
        let mut aliases: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (node, instance) in nodes {
            if let Some((host, _port)) = instance.rsplit_once(':') {
                aliases
                    .entry(host.to_string())
                    .or_default()
                    .insert(node.clone());
            }
            aliases
                .entry(instance.clone())
                .or_default()
                .insert(node.clone());
        }

        let mut targets = HashMap::new();
        for (alias, owners) in aliases {
            if owners.len() > 1 {
                debug!(alias = %alias, nodes = ?owners, "Ignoring alias shared by several nodes");
                continue;
            }
            if let Some(node) = owners.into_iter().next() {
                targets.insert(alias, node);
            }
        }
        // Node names take precedence over any colliding instance spelling
        for node in nodes.keys() {
            targets.insert(node.clone(), node.clone());
        }
        Self { targets }
    }

    pub fn decode(&self, verdict: &Verdict) -> Decoded {
        let mut decoded = Decoded::default();

        for (key, approval) in verdict.entries() {
            if !is_truthy(approval) {
                continue;
            }

            let descriptor = match parse_descriptor(key) {
                Ok(descriptor) => descriptor,
                Err(reason) => {
                    debug!(key = %key, reason = %reason, "Skipping undecodable verdict key");
                    decoded.recovered.push(Recovered::VerdictDecodeSkip {
                        key: key.to_string(),
                        reason,
                    });
                    continue;
                }
            };

            let Some(raw_node) = descriptor.node.as_str() else {
                decoded.recovered.push(Recovered::VerdictDecodeSkip {
                    key: key.to_string(),
                    reason: "descriptor has no string `node`".to_string(),
                });
                continue;
            };

            let raw_action = descriptor.action.as_str().unwrap_or_default();
            let kind = classify_action(raw_action);
            let resource = classify_resource(descriptor.resource.as_str(), raw_action);

            let Some(node) = self.targets.get(raw_node) else {
                debug!(node = %raw_node, key = %key, "Skipping action for unknown node");
                decoded.recovered.push(Recovered::UnknownTargetSkip {
                    node: raw_node.to_string(),
                    key: key.to_string(),
                });
                continue;
            };

            decoded.actions.push(Action {
                node: node.clone(),
                kind,
                resource,
                raw_action: raw_action.to_string(),
            });
        }

        decoded
    }
}

fn parse_descriptor(key: &str) -> Result<Descriptor, String> {
    let value: Value = serde_json::from_str(key).map_err(|e| format!("not JSON: {}", e))?;
    if !value.is_object() {
        return Err("descriptor is not an object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Classify a free-form action string, case-insensitively
pub fn classify_action(action: &str) -> ActionKind {
    let action = action.to_lowercase();
    if action.contains("up") {
        ActionKind::ScaleUp
    } else if action.contains("down") {
        ActionKind::ScaleDown
    } else if action == "migrate_workloads" {
        ActionKind::MigrateWorkloads
    } else if action.is_empty() || action == "none" {
        ActionKind::None
    } else {
        ActionKind::Unrecognized
    }
}

/// Classify the targeted resource from the explicit field and the action name
pub fn classify_resource(resource: Option<&str>, action: &str) -> ResourceKind {
    if resource == Some("memory") || action.to_lowercase().contains("mem") {
        ResourceKind::Memory
    } else if resource.is_some() {
        ResourceKind::Cpu
    } else {
        ResourceKind::Unspecified
    }
}

/// Approval truthiness: `false`, `null`, zero and empty values are not approvals
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
