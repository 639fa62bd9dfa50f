//! Live allocation runs (failover and autoscale)

use anyhow::{Context, Result};
use engine_lib::{EngineConfig, Pipeline, PipelineMetrics, RunFailure, RunReport};
use std::path::Path;
use tracing::warn;

use crate::output::{
    print_actions, print_allocations, print_dump, print_error, print_info, print_json,
    print_recovered, print_success, print_warning, OutputFormat,
};

/// Execute one pipeline run and report the outcome
pub async fn run_pipeline(
    mut config: EngineConfig,
    dry_run: bool,
    format: OutputFormat,
    metrics_file: Option<&Path>,
) -> Result<()> {
    config.dry_run |= dry_run;
    let pipeline = Pipeline::from_config(&config)?;
    let outcome = match pipeline.run().await {
        Ok(report) => {
            match format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Table => print_report(&report),
            }
            Ok(())
        }
        Err(failure) => {
            dump_failure(&failure);
            Err(failure.into())
        }
    };

    // The metrics textfile is best effort and never changes the run outcome
    if let Some(path) = metrics_file {
        if let Err(e) = write_metrics(path) {
            warn!(event = "metrics_file_failed", error = %format!("{:#}", e), "Failed to write metrics file");
        }
    }

    outcome
}

fn print_report(report: &RunReport) {
    print_dump("Policy input:", &report.request);
    print_dump("Policy decision (raw):", &report.verdict);

    print_recovered(&report.recovered);
    print_actions(&report.actions);

    if !report.migrations.is_empty() {
        let nodes: Vec<&str> = report.migrations.iter().map(String::as_str).collect();
        print_warning(&format!("Workload migration requested for: {}", nodes.join(", ")));
    }

    print_allocations(&report.allocations, &report.migrations);

    match &report.artifact {
        Some(path) => print_success(&format!("Wrote {}", path.display())),
        None => print_info("Dry-run mode - artifact not written"),
    }
}

/// Show what was exchanged with the evaluator before the run aborted
fn dump_failure(failure: &RunFailure) {
    if let Some(request) = &failure.request {
        print_dump("Policy input was:", request);
    }
    if let Some(verdict) = &failure.verdict {
        print_dump("Policy decision was:", verdict);
    }
    print_error(&format!("{} stage failed", failure.error.stage()));
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = PipelineMetrics::new().render();
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics file {:?}", path))
}
