//! benchctl - reconcile accelerator cluster nodes and run benchmark workloads

use anyhow::Result;
use bench_core::{Config, LoggingConfig, NodeRole, RunMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

mod commands;
mod output;

use commands::run::RunOptions;
use output::OutputFormat;

/// Drive a bare-metal accelerator cluster and run benchmark workloads on it
#[derive(Debug, Parser)]
#[command(name = "benchctl")]
#[command(about = "Drive a bare-metal accelerator cluster and run benchmark workloads on it")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Bring this node to Joined in the given role, resetting partial state first
    #[command(name = "reconcile-node")]
    ReconcileNode {
        /// Desired role (control-plane or worker)
        #[arg(short, long)]
        role: NodeRole,

        /// Join credential file (JSON) minted on the control plane, required for workers
        #[arg(long, value_name = "FILE")]
        credential: Option<PathBuf>,
    },

    /// Mint a join credential for workers (run on the control plane)
    #[command(name = "mint-credential")]
    MintCredential {
        /// Credential lifetime in seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Observe the live cluster state
    #[command(name = "cluster-state")]
    ClusterState,

    /// Verify the cluster can accept benchmark jobs
    #[command(name = "preflight")]
    Preflight {
        /// Create a missing runtime class or namespace
        #[arg(long)]
        autofix: bool,
    },

    /// Run benchmark jobs and aggregate their results
    #[command(name = "run")]
    Run {
        /// Benchmarks to run, comma separated (all when omitted)
        #[arg(short, long, value_delimiter = ',')]
        job: Vec<String>,

        /// Run mode (smoke or full)
        #[arg(short, long, default_value = "smoke")]
        mode: RunMode,

        /// Override each job's wall-clock timeout
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Supervise jobs concurrently
        #[arg(long)]
        parallel: bool,

        /// Let preflight create a missing runtime class or namespace
        #[arg(long)]
        autofix: bool,
    },

    /// List the configured benchmark catalog
    #[command(name = "list-benchmarks")]
    ListBenchmarks,

    /// Show the summary of a previous run
    #[command(name = "summary")]
    Summary {
        /// Run directory or summary.json path
        #[arg(value_name = "RUN_DIR")]
        path: PathBuf,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate the configuration and report where it was loaded from
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.clone());
    let config = Config::load(config_path.as_deref())?;
    init_logging(&config.logging, cli.verbose);
    debug!(config = ?config_path, "loaded configuration");

    let output_format = cli.output;

    match cli.command {
        Commands::ReconcileNode { role, credential } => {
            commands::node::reconcile_node(&config, role, credential, output_format).await?;
        }

        Commands::MintCredential { ttl_secs } => {
            commands::node::mint_credential(&config, ttl_secs, output_format).await?;
        }

        Commands::ClusterState => {
            commands::cluster::cluster_state(&config, output_format).await?;
        }

        Commands::Preflight { autofix } => {
            commands::cluster::preflight(&config, autofix, output_format).await?;
        }

        Commands::Run {
            job,
            mode,
            timeout_secs,
            parallel,
            autofix,
        } => {
            let options = RunOptions {
                jobs: job,
                mode,
                timeout_secs,
                parallel,
                autofix,
            };
            commands::run::run_benchmarks(&config, options, output_format).await?;
        }

        Commands::ListBenchmarks => {
            commands::benchmarks::list_benchmarks(&config, output_format)?;
        }

        Commands::Summary { path } => {
            commands::summary::show_summary(&path, output_format).await?;
        }

        Commands::Config { action } => {
            commands::config::handle_config_command(&config, config_path.as_deref(), action, output_format)?;
        }
    }

    Ok(())
}

/// Explicit `--config` wins; otherwise `$BENCHCTL_CONFIG` and the standard
/// locations are searched by the loader, with the per-user config dir
/// consulted first when it holds a file.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() || std::env::var_os("BENCHCTL_CONFIG").is_some() {
        return explicit;
    }
    dirs::config_dir()
        .map(|dir| dir.join("benchctl").join("config.yaml"))
        .filter(|path| path.exists())
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "benchctl={level},bench_core={level},bench_cluster={level},bench_supervisor={level},bench_results={level}"
        ))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging.show_target)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}
