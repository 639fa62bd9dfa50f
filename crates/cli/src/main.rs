//! Policy Allocation CLI
//!
//! Runs the closed-loop allocation pipeline: query Prometheus, ask the
//! policy evaluator, and write per-node CPU/memory inputs for provisioning.

mod commands;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{replay, run};
use engine_lib::{EngineConfig, PipelineError, RunFailure, Variant};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Policy Allocation CLI
#[derive(Parser)]
#[command(name = "palloc")]
#[command(author, version, about = "Policy-driven resource allocation for edge nodes", long_about = None)]
pub struct Cli {
    /// Prometheus base URL (can also be set via PALLOC_PROMETHEUS_URL env var)
    #[arg(long, global = true, env = "PALLOC_PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Write Prometheus metrics in text format to this file after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Liveness-driven failover: boost survivors, flag down nodes for migration
    Failover(RunArgs),

    /// Utilization-driven autoscale from CPU and memory percentages
    Autoscale {
        #[command(flatten)]
        run: RunArgs,

        /// Prometheus rate window (e.g., 1m, 5m)
        #[arg(long)]
        window: Option<String>,
    },

    /// Decode and resolve a saved policy decision without contacting any backend
    Replay {
        /// JSON file holding the evaluator response or bare verdict
        #[arg(long)]
        verdict: PathBuf,

        /// Variant whose allocation table applies
        #[arg(long, value_enum, default_value = "utilization")]
        variant: VariantArg,

        /// Write the resulting artifact to this path
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Policy decision endpoint URL
    #[arg(long)]
    pub policy_url: Option<String>,

    /// Output YAML path
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Compute allocations without writing the artifact
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum VariantArg {
    Failover,
    Utilization,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Failover => Variant::Failover,
            VariantArg::Utilization => Variant::Utilization,
        }
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Load file/env configuration and apply command-line overrides
fn load_config(cli: &Cli, variant: Variant) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    config.variant = variant;
    if let Some(url) = &cli.prometheus_url {
        config.prometheus_url = url.clone();
    }
    debug!(
        event = "config_loaded",
        variant = %config.variant,
        file = ?cli.config,
        prometheus_url = %config.prometheus_url,
        nodes = config.nodes.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn apply_run_args(config: &mut EngineConfig, args: &RunArgs) {
    if let Some(url) = &args.policy_url {
        config.policy_url = Some(url.clone());
    }
    if let Some(out) = &args.out {
        config.output = Some(out.clone());
    }
}

async fn execute(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Failover(args) => {
            let mut config = load_config(&cli, Variant::Failover)?;
            apply_run_args(&mut config, args);
            run::run_pipeline(config, args.dry_run, cli.format, cli.metrics_file.as_deref()).await
        }
        Commands::Autoscale { run: args, window } => {
            let mut config = load_config(&cli, Variant::Utilization)?;
            apply_run_args(&mut config, args);
            if let Some(window) = window {
                config.window = window.clone();
            }
            run::run_pipeline(config, args.dry_run, cli.format, cli.metrics_file.as_deref()).await
        }
        Commands::Replay {
            verdict,
            variant,
            out,
        } => {
            let config = load_config(&cli, (*variant).into())?;
            replay::replay_verdict(&config, verdict, out.as_deref(), cli.format)
        }
    }
}

/// Exit code for a failed command: the pipeline stage when known, else 1
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = if let Some(failure) = err.downcast_ref::<RunFailure>() {
        failure.exit_code()
    } else if let Some(pipeline) = err.downcast_ref::<PipelineError>() {
        pipeline.exit_code()
    } else {
        1
    };
    debug!(event = "exit", code = code, "Mapped command failure to exit code");
    code as u8
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors share exit code 1 with configuration errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.log_json, cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::print_error(&format!("{:#}", err));
            ExitCode::from(exit_code(&err))
        }
    }
}
