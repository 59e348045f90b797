//! # Flowcast
//!
//! Workflow orchestration and multi-channel distribution server.
//!
//! Usage:
//!   flowcast serve                      # Start the HTTP API (default port 3100)
//!   flowcast serve --port 8080          # Custom port
//!   flowcast init                       # Write a default ~/.flowcast/config.toml
//!   flowcast check                      # Validate config and check the queue store
//!   flowcast run workflow.json          # Execute a workflow definition once and print the result

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flowcast_core::FlowcastConfig;
use flowcast_core::types::WorkflowDraft;
use flowcast_engine::Orchestrator;

#[derive(Parser)]
#[command(
    name = "flowcast",
    version,
    about = "📡 Flowcast: workflow orchestration & distribution engine"
)]
struct Cli {
    /// Config file (default: ~/.flowcast/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API, scheduler and queue workers
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the config and report what would be wired up
    Check,
    /// Run a workflow definition (JSON) once, inline
    Run {
        /// Path to a workflow JSON file
        file: String,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => FlowcastConfig::default_path(),
    }
}

fn load_config(path: &Path) -> Result<FlowcastConfig> {
    if path.exists() {
        FlowcastConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(FlowcastConfig::default())
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "flowcast=debug,flowcast_core=debug,flowcast_scheduler=debug,flowcast_channels=debug,flowcast_engine=debug,flowcast_gateway=debug,tower_http=debug"
    } else {
        "flowcast=info,flowcast_core=info,flowcast_scheduler=info,flowcast_channels=info,flowcast_engine=info,flowcast_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(&cli);

    if let Command::Init { force } = &cli.command {
        init_logging(cli.verbose, false);
        if path.exists() && !force {
            println!("⚠️  {} already exists (use --force to overwrite)", path.display());
            return Ok(());
        }
        FlowcastConfig::default().save_to(&path)?;
        println!("✅ Wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = load_config(&path)?;
    init_logging(cli.verbose, config.server.log_format == "json");

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let orchestrator = Arc::new(Orchestrator::builder(config).build().await);
            flowcast_gateway::start(orchestrator).await?;
        }
        Command::Check => {
            println!("📡 Flowcast configuration check\n");
            println!("   Config:    {}", path.display());
            println!("   Server:    {}:{}", config.server.host, config.server.port);
            println!(
                "   Planner:   {}",
                config.planner.base_url.as_deref().unwrap_or("built-in template")
            );
            println!(
                "   Delegate:  {}",
                config.delegate.as_ref().map(|d| d.base_url.as_str()).unwrap_or("not configured")
            );
            for q in &config.queue.queues {
                println!(
                    "   Queue:     {} (concurrency {}, attempts {})",
                    q.name, q.concurrency, q.attempts
                );
            }
            let orchestrator = Orchestrator::builder(config).build().await;
            let health = orchestrator.health()?;
            println!("   Channels:  {}", health.channels.join(", "));
            match health.queue.reason {
                None => println!("\n✅ Queue store reachable"),
                Some(reason) => println!("\n⚠️  Queue disabled: {reason}"),
            }
        }
        Command::Run { file } => {
            let raw = std::fs::read_to_string(shellexpand::tilde(&file).as_ref())
                .with_context(|| format!("reading {file}"))?;
            let draft: WorkflowDraft = serde_json::from_str(&raw).context("parsing workflow JSON")?;
            config.queue.enabled = false;
            let orchestrator = Orchestrator::builder(config).build().await;
            let workflow = orchestrator.create_workflow(draft).await?;
            let execution = orchestrator.execute_now(&workflow.id, serde_json::Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
            orchestrator.shutdown();
        }
        Command::Init { .. } => {}
    }
    Ok(())
}
