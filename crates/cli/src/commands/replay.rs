//! Offline replay of a saved policy decision

use anyhow::{Context, Result};
use engine_lib::{decide, Action, Allocation, ConfigSink, EngineConfig, Recovered, Verdict};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::output::{
    print_actions, print_allocations, print_json, print_recovered, print_success, OutputFormat,
};

#[derive(Serialize)]
struct ReplayReport<'a> {
    actions: &'a [Action],
    migrations: &'a BTreeSet<String>,
    allocations: &'a BTreeMap<String, Allocation>,
    recovered: &'a [Recovered],
}

/// Decode a saved verdict and resolve allocations without contacting any backend.
///
/// The file may hold a full evaluator response (`{"result": {...}}`) or the
/// bare verdict object.
pub fn replay_verdict(
    config: &EngineConfig,
    verdict_path: &Path,
    out: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    config.validate()?;

    let content = std::fs::read_to_string(verdict_path)
        .with_context(|| format!("Failed to read verdict file {:?}", verdict_path))?;
    let body: serde_json::Value =
        serde_json::from_str(&content).context("Verdict file is not valid JSON")?;
    let verdict = if body.get("result").is_some() {
        Verdict::from_response(body)
    } else {
        Verdict::from_response(serde_json::json!({ "result": body }))
    };

    let (decoded, resolution) = decide(&verdict, &config.nodes, config.allocation_table());

    match format {
        OutputFormat::Json => print_json(&ReplayReport {
            actions: &decoded.actions,
            migrations: &resolution.migrations,
            allocations: &resolution.allocations,
            recovered: &decoded.recovered,
        }),
        OutputFormat::Table => {
            print_recovered(&decoded.recovered);
            print_actions(&decoded.actions);
            print_allocations(&resolution.allocations, &resolution.migrations);
        }
    }

    if let Some(path) = out {
        ConfigSink::write(path, &resolution.allocations)?;
        if matches!(format, OutputFormat::Table) {
            print_success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}
