//! Allocation resolution
//!
//! Seeds every configured node with the table default, then applies
//! approved actions in order. Later actions overwrite earlier ones for the
//! same node and resource. Migrations never change an allocation; they are
//! returned separately for the caller to act on.

use crate::models::{Action, ActionKind, Allocation, NodeMap, ResourceKind, Variant};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// CPU cores and memory quantity for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceValues {
    pub cpu: u32,
    pub memory: String,
}

impl ResourceValues {
    pub fn new(cpu: u32, memory: impl Into<String>) -> Self {
        Self {
            cpu,
            memory: memory.into(),
        }
    }
}

/// Where an action without a resource hint lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnspecifiedTarget {
    #[default]
    Cpu,
    Both,
}

/// Lookup table from action kind to resource values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTable {
    pub default: ResourceValues,
    pub scale_up: ResourceValues,
    pub scale_down: ResourceValues,
    #[serde(default)]
    pub unspecified: UnspecifiedTarget,
}

impl AllocationTable {
    /// Binary table: survivors are boosted, nothing is ever reduced
    pub fn failover() -> Self {
        Self {
            default: ResourceValues::new(1, "2048Mi"),
            scale_up: ResourceValues::new(2, "4096Mi"),
            scale_down: ResourceValues::new(1, "2048Mi"),
            unspecified: UnspecifiedTarget::Both,
        }
    }

    /// Three-tier table for utilization-driven scaling
    pub fn utilization() -> Self {
        Self {
            default: ResourceValues::new(1, "2048Mi"),
            scale_up: ResourceValues::new(4, "4096Mi"),
            scale_down: ResourceValues::new(2, "2048Mi"),
            unspecified: UnspecifiedTarget::Cpu,
        }
    }

    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Failover => Self::failover(),
            Variant::Utilization => Self::utilization(),
        }
    }

    fn tier(&self, kind: ActionKind) -> Option<&ResourceValues> {
        match kind {
            ActionKind::ScaleUp => Some(&self.scale_up),
            ActionKind::ScaleDown => Some(&self.scale_down),
            ActionKind::MigrateWorkloads | ActionKind::None | ActionKind::Unrecognized => None,
        }
    }

    fn targets(&self, resource: ResourceKind) -> (bool, bool) {
        match (resource, self.unspecified) {
            (ResourceKind::Cpu, _) => (true, false),
            (ResourceKind::Memory, _) => (false, true),
            (ResourceKind::Unspecified, UnspecifiedTarget::Cpu) => (true, false),
            (ResourceKind::Unspecified, UnspecifiedTarget::Both) => (true, true),
        }
    }
}

/// Final allocations plus nodes whose workloads should be relocated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub allocations: BTreeMap<String, Allocation>,
    pub migrations: BTreeSet<String>,
}

pub struct AllocationResolver {
    table: AllocationTable,
}

impl AllocationResolver {
    pub fn new(table: AllocationTable) -> Self {
        Self { table }
    }

    /// Resolve allocations for exactly the configured node set
    pub fn resolve(&self, actions: &[Action], nodes: &NodeMap) -> Resolution {
        let mut allocations: BTreeMap<String, Allocation> = nodes
            .keys()
            .map(|node| {
                let allocation = Allocation {
                    node: node.clone(),
                    cpu: self.table.default.cpu,
                    memory: self.table.default.memory.clone(),
                };
                (node.clone(), allocation)
            })
            .collect();
        let mut migrations = BTreeSet::new();

        for action in actions {
            let Some(allocation) = allocations.get_mut(&action.node) else {
                continue;
            };

            if action.kind == ActionKind::MigrateWorkloads {
                migrations.insert(action.node.clone());
                continue;
            }

            let Some(tier) = self.table.tier(action.kind) else {
                continue;
            };

            let (cpu, memory) = self.table.targets(action.resource);
            if cpu {
                allocation.cpu = tier.cpu;
            }
            if memory {
                allocation.memory = tier.memory.clone();
            }
            debug!(
                node = %action.node,
                kind = action.kind.as_str(),
                cpu = allocation.cpu,
                memory = %allocation.memory,
                "Applied action"
            );
        }

        Resolution {
            allocations,
            migrations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> NodeMap {
        ["vm1", "vm2", "vm3"]
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), format!("172.27.50.{}:9100", 159 + i)))
            .collect()
    }

    fn action(node: &str, kind: ActionKind, resource: ResourceKind) -> Action {
        Action {
            node: node.to_string(),
            kind,
            resource,
            raw_action: kind.as_str().to_string(),
        }
    }

    #[test]
    fn test_empty_actions_yield_defaults() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let resolution = resolver.resolve(&[], &nodes());

        assert_eq!(resolution.allocations.len(), 3);
        for allocation in resolution.allocations.values() {
            assert_eq!(allocation.cpu, 1);
            assert_eq!(allocation.memory, "2048Mi");
        }
        assert!(resolution.migrations.is_empty());
    }

    #[test]
    fn test_memory_scale_up_leaves_cpu_default() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let resolution = resolver.resolve(
            &[action("vm2", ActionKind::ScaleUp, ResourceKind::Memory)],
            &nodes(),
        );

        let vm2 = &resolution.allocations["vm2"];
        assert_eq!(vm2.memory, "4096Mi");
        assert_eq!(vm2.cpu, 1);
    }

    #[test]
    fn test_last_applied_action_wins() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let actions = [
            action("vm1", ActionKind::ScaleUp, ResourceKind::Cpu),
            action("vm1", ActionKind::ScaleDown, ResourceKind::Cpu),
        ];

        let resolution = resolver.resolve(&actions, &nodes());
        assert_eq!(resolution.allocations["vm1"].cpu, 2);

        let reversed: Vec<Action> = actions.iter().rev().cloned().collect();
        let resolution = resolver.resolve(&reversed, &nodes());
        assert_eq!(resolution.allocations["vm1"].cpu, 4);
    }

    #[test]
    fn test_unknown_node_never_mutates_output() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let resolution = resolver.resolve(
            &[action("vm9", ActionKind::ScaleUp, ResourceKind::Cpu)],
            &nodes(),
        );

        assert_eq!(resolution, resolver.resolve(&[], &nodes()));
        assert!(!resolution.allocations.contains_key("vm9"));
    }

    #[test]
    fn test_migration_is_recorded_not_applied() {
        let resolver = AllocationResolver::new(AllocationTable::failover());
        let resolution = resolver.resolve(
            &[action("vm3", ActionKind::MigrateWorkloads, ResourceKind::Unspecified)],
            &nodes(),
        );

        assert!(resolution.migrations.contains("vm3"));
        assert_eq!(resolution.allocations["vm3"].cpu, 1);
        assert_eq!(resolution.allocations["vm3"].memory, "2048Mi");
    }

    #[test]
    fn test_failover_boost_without_resource_hint_boosts_both() {
        let resolver = AllocationResolver::new(AllocationTable::failover());
        let resolution = resolver.resolve(
            &[action("vm1", ActionKind::ScaleUp, ResourceKind::Unspecified)],
            &nodes(),
        );

        assert_eq!(resolution.allocations["vm1"].cpu, 2);
        assert_eq!(resolution.allocations["vm1"].memory, "4096Mi");
    }

    #[test]
    fn test_utilization_unspecified_resource_targets_cpu() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let resolution = resolver.resolve(
            &[action("vm1", ActionKind::ScaleDown, ResourceKind::Unspecified)],
            &nodes(),
        );

        assert_eq!(resolution.allocations["vm1"].cpu, 2);
        assert_eq!(resolution.allocations["vm1"].memory, "2048Mi");
    }

    #[test]
    fn test_none_and_unrecognized_do_not_mutate() {
        let resolver = AllocationResolver::new(AllocationTable::utilization());
        let actions = [
            action("vm1", ActionKind::ScaleUp, ResourceKind::Cpu),
            action("vm1", ActionKind::None, ResourceKind::Cpu),
            action("vm1", ActionKind::Unrecognized, ResourceKind::Cpu),
        ];

        let resolution = resolver.resolve(&actions, &nodes());
        assert_eq!(resolution.allocations["vm1"].cpu, 4);
    }

    #[test]
    fn test_custom_table_is_honored() {
        let table = AllocationTable {
            default: ResourceValues::new(2, "1Gi"),
            scale_up: ResourceValues::new(8, "16Gi"),
            scale_down: ResourceValues::new(1, "512Mi"),
            unspecified: UnspecifiedTarget::Cpu,
        };
        let resolver = AllocationResolver::new(table);
        let resolution = resolver.resolve(
            &[action("vm2", ActionKind::ScaleUp, ResourceKind::Memory)],
            &nodes(),
        );

        assert_eq!(resolution.allocations["vm1"].memory, "1Gi");
        assert_eq!(resolution.allocations["vm2"].memory, "16Gi");
        assert_eq!(resolution.allocations["vm2"].cpu, 2);
    }
}
