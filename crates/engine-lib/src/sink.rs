//! Allocation artifact output
//!
//! The artifact is a flat YAML mapping of `cpu_<node>` (integer cores) and
//! `memory_<node>` (quantity string) consumed by the provisioning
//! blueprint. Keys are sorted so successive runs diff cleanly.

use crate::error::{PipelineError, Result};
use crate::models::Allocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single artifact value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactValue {
    Cores(u32),
    Quantity(String),
}

/// Flat key/value artifact in sorted key order
pub type ConfigArtifact = BTreeMap<String, ArtifactValue>;

/// Flatten allocations to the `cpu_<node>` / `memory_<node>` convention
pub fn to_artifact(allocations: &BTreeMap<String, Allocation>) -> ConfigArtifact {
    let mut artifact = ConfigArtifact::new();
    for (node, allocation) in allocations {
        artifact.insert(format!("cpu_{}", node), ArtifactValue::Cores(allocation.cpu));
        artifact.insert(
            format!("memory_{}", node),
            ArtifactValue::Quantity(allocation.memory.clone()),
        );
    }
    artifact
}

pub struct ConfigSink;

impl ConfigSink {
    /// Replace the artifact at `path`.
    ///
    /// Content goes to a sibling temp file that is synced and then renamed
    /// over the target, so readers see either the old or the new artifact.
    pub fn write(path: &Path, allocations: &BTreeMap<String, Allocation>) -> Result<()> {
        let fail = |source: std::io::Error| PipelineError::ArtifactWriteFailure {
            path: path.to_path_buf(),
            source,
        };

        let yaml = serde_yaml::to_string(&to_artifact(allocations))
            .map_err(|e| fail(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let temp_path = temp_path_for(path);
        let written = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(fail(e));
        }

        debug!(path = %path.display(), nodes = allocations.len(), "Artifact written");
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
