//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, an optional file
//! (TOML, YAML or JSON), then `PALLOC_*` environment variables. The CLI
//! applies its flags on top of the loaded value.

use crate::error::{PipelineError, Result};
use crate::models::{NodeMap, Variant};
use crate::request::DEFAULT_SOURCE_TAG;
use crate::resolver::AllocationTable;
use crate::source::PrometheusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Per-call network timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_liveness_secs")]
    pub liveness_secs: u64,
    #[serde(default = "default_query_secs")]
    pub query_secs: u64,
    /// Policy call timeout; when unset the variant default applies
    #[serde(default)]
    pub policy_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            liveness_secs: default_liveness_secs(),
            query_secs: default_query_secs(),
            policy_secs: None,
        }
    }
}

fn default_liveness_secs() -> u64 {
    6
}

fn default_query_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub variant: Variant,

    /// Monitoring backend base URL
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Policy decision endpoint; variant default when unset
    #[serde(default)]
    pub policy_url: Option<String>,

    /// Rate window for the CPU utilization query
    #[serde(default = "default_window")]
    pub window: String,

    /// Artifact path; variant default when unset
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Provenance tag placed in every policy request
    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    /// Logical node name to monitoring instance. Written as a list of
    /// `{name, instance}` entries: map keys are case-folded by the loader,
    /// node names must survive verbatim.
    #[serde(default = "default_nodes", with = "node_list")]
    pub nodes: NodeMap,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Allocation table override; variant default when unset
    #[serde(default)]
    pub table: Option<AllocationTable>,

    /// Resolve allocations without writing the artifact
    #[serde(default)]
    pub dry_run: bool,
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_window() -> String {
    "1m".to_string()
}

fn default_source_tag() -> String {
    DEFAULT_SOURCE_TAG.to_string()
}

fn default_nodes() -> NodeMap {
    [
        ("vm1", "172.27.50.159:9100"),
        ("vm2", "172.27.50.160:9100"),
        ("vm3", "172.27.50.161:9100"),
    ]
    .into_iter()
    .map(|(node, instance)| (node.to_string(), instance.to_string()))
    .collect()
}

mod node_list {
    use crate::models::NodeMap;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct NodeEntry {
        name: String,
        instance: String,
    }

    pub fn serialize<S: Serializer>(nodes: &NodeMap, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<NodeEntry> = nodes
            .iter()
            .map(|(name, instance)| NodeEntry {
                name: name.clone(),
                instance: instance.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeMap, D::Error> {
        let entries = Vec::<NodeEntry>::deserialize(deserializer)?;
        let mut nodes = NodeMap::new();
        for entry in entries {
            if nodes.insert(entry.name.clone(), entry.instance).is_some() {
                return Err(D::Error::custom(format!("duplicate node {:?}", entry.name)));
            }
        }
        Ok(nodes)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            prometheus_url: default_prometheus_url(),
            policy_url: None,
            window: default_window(),
            output: None,
            source_tag: default_source_tag(),
            nodes: default_nodes(),
            timeouts: TimeoutConfig::default(),
            table: None,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("PALLOC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn policy_url(&self) -> String {
        self.policy_url.clone().unwrap_or_else(|| {
            match self.variant {
                Variant::Failover => "http://localhost:8181/v1/data/nativeedge/failure/actions",
                Variant::Utilization => "http://localhost:8181/v1/data/blueprint/adapt/actions",
            }
            .to_string()
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(match self.variant {
                Variant::Failover => "inputs_failover.yaml",
                Variant::Utilization => "inputs.yaml",
            })
        })
    }

    /// Where the run writes its artifact; `None` on dry runs
    pub fn artifact_target(&self) -> Option<PathBuf> {
        (!self.dry_run).then(|| self.output_path())
    }

    pub fn policy_timeout(&self) -> Duration {
        let secs = self.timeouts.policy_secs.unwrap_or(match self.variant {
            Variant::Failover => 8,
            Variant::Utilization => 10,
        });
        Duration::from_secs(secs)
    }

    pub fn allocation_table(&self) -> AllocationTable {
        self.table
            .clone()
            .unwrap_or_else(|| AllocationTable::for_variant(self.variant))
    }

    pub fn prometheus(&self) -> PrometheusConfig {
        PrometheusConfig {
            base_url: self.prometheus_url.clone(),
            window: self.window.clone(),
            liveness_timeout: Duration::from_secs(self.timeouts.liveness_secs),
            query_timeout: Duration::from_secs(self.timeouts.query_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PipelineError::Config("no nodes configured".to_string()));
        }
        if let Some((node, _)) = self.nodes.iter().find(|(_, instance)| instance.is_empty()) {
            return Err(PipelineError::Config(format!(
                "node {:?} has an empty instance",
                node
            )));
        }
        if self.window.trim().is_empty() {
            return Err(PipelineError::Config("query window is empty".to_string()));
        }
        for url in [self.prometheus_url.clone(), self.policy_url()] {
            Url::parse(&url)
                .map_err(|e| PipelineError::Config(format!("invalid URL {:?}: {}", url, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.output_path(), PathBuf::from("inputs.yaml"));
    }

    #[test]
    fn test_variant_defaults() {
        let config = EngineConfig {
            variant: Variant::Failover,
            ..EngineConfig::default()
        };
        assert!(config.policy_url().ends_with("/nativeedge/failure/actions"));
        assert_eq!(config.output_path(), PathBuf::from("inputs_failover.yaml"));
        assert_eq!(config.policy_timeout(), Duration::from_secs(8));
        assert_eq!(config.allocation_table(), AllocationTable::failover());
    }

    #[test]
    fn test_dry_run_has_no_artifact_target() {
        let config = EngineConfig {
            dry_run: true,
            ..EngineConfig::default()
        };
        assert_eq!(config.artifact_target(), None);
        assert_eq!(
            EngineConfig::default().artifact_target(),
            Some(PathBuf::from("inputs.yaml"))
        );
    }

    #[test]
    fn test_validate_rejects_empty_nodes() {
        let config = EngineConfig {
            nodes: NodeMap::new(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = EngineConfig {
            policy_url: Some("not a url".to_string()),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palloc.toml");
        fs::write(
            &path,
            r#"
variant = "failover"
window = "5m"

[[nodes]]
name = "edge-a"
instance = "10.0.0.1:9100"

[table]
default = { cpu = 2, memory = "1Gi" }
scale_up = { cpu = 6, memory = "8Gi" }
scale_down = { cpu = 2, memory = "1Gi" }
unspecified = "both"
"#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();

        assert_eq!(config.variant, Variant::Failover);
        assert_eq!(config.window, "5m");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.allocation_table().scale_up.cpu, 6);
        assert_eq!(config.prometheus_url, "http://localhost:9090");
    }

    #[test]
    fn test_load_keeps_node_name_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palloc.toml");
        fs::write(
            &path,
            r#"
[[nodes]]
name = "EdgeA"
instance = "10.0.0.1:9100"

[[nodes]]
name = "edgeB"
instance = "10.0.0.2:9100"
"#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();

        let names: Vec<&str> = config.nodes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["EdgeA", "edgeB"]);
        assert_eq!(config.nodes["EdgeA"], "10.0.0.1:9100");
    }

    #[test]
    fn test_load_rejects_duplicate_node() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palloc.toml");
        fs::write(
            &path,
            r#"
[[nodes]]
name = "vm1"
instance = "10.0.0.1:9100"

[[nodes]]
name = "vm1"
instance = "10.0.0.2:9100"
"#,
        )
        .unwrap();

        let err = EngineConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = EngineConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
