//! Agora Node
//!
//! Process entry point for the coordination core: loads configuration,
//! installs logging, opens the entity store, builds the chain gateways and
//! runs one operator command before closing the store again.
//!
//! # Usage
//!
//! ```bash
//! # Walk through a full escrowed task on an in-memory store
//! agora-node --store-url memory demo
//!
//! # Inspect a persistent node
//! agora-node status
//! agora-node transactions --unsettled
//!
//! # Fail tasks dispatched more than an hour ago and refund their escrows
//! agora-node sweep --max-age-secs 3600
//! ```

mod config;
mod demo;

use agora_coordinator::Agora;
use agora_types::{AgentId, ChainTxFilter, TaskStatus};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AgoraConfig;

/// Agora Node - agent task, escrow and reputation coordination
#[derive(Parser, Debug)]
#[command(name = "agora-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "AGORA_CONFIG")]
    config: Option<String>,

    /// Entity store URL (`memory` or a SQLite URL)
    #[arg(long, env = "AGORA_DATABASE_URL")]
    store_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AGORA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "AGORA_LOG_FORMAT")]
    log_format: Option<String>,

    /// Use development defaults (in-memory store, stub gateways)
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register two agents and run an escrowed task end to end
    Demo,
    /// Print a summary of agents, tasks and gateway modes
    Status,
    /// List chain transaction log entries
    Transactions {
        /// Only failed or zero-reference entries
        #[arg(long)]
        unsettled: bool,
        /// Filter by agent id or address
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List tasks, optionally by status
    Tasks {
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Show an agent's reputation and balance
    Agent { id: AgentId },
    /// Fail dispatched tasks older than the given age and refund their escrows
    Sweep {
        #[arg(long)]
        max_age_secs: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut node_config = if args.dev {
        AgoraConfig::development()
    } else {
        AgoraConfig::load(args.config.as_deref())?
    };
    if let Some(url) = args.store_url {
        node_config.store.url = url;
    }
    if let Some(level) = args.log_level {
        node_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        node_config.logging.format = format;
    }

    init_logging(&node_config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Agora node");

    let store = agora_store::open_store(&node_config.store).await?;
    let agora = Agora::open(store, &node_config.chain, node_config.registration.clone())?;
    for (backend, mode) in agora.gateways().modes() {
        tracing::info!(backend = %backend, mode = %mode, "Settlement backend ready");
    }

    let result = run(&agora, args.command).await;
    agora.close().await;
    tracing::info!("Agora node stopped");
    result
}

async fn run(agora: &Agora, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Demo => {
            let report = demo::run(agora).await?;
            print_json(&report)?;
        }
        Command::Status => print_json(&agora.status_summary().await?)?,
        Command::Transactions {
            unsettled,
            agent,
            limit,
        } => {
            let entries = if unsettled {
                agora.unsettled_transactions().await?
            } else {
                let filter = ChainTxFilter {
                    agent_id: agent,
                    limit: Some(limit),
                    ..Default::default()
                };
                agora.transactions(&filter).await?
            };
            print_json(&entries)?;
        }
        Command::Tasks { status } => print_json(&agora.tasks().list_tasks(status).await?)?,
        Command::Agent { id } => {
            let reputation = agora.reputation().get_agent_reputation(&id).await?;
            let balance = agora.registry().agent_balance(&id).await?;
            print_json(&serde_json::json!({
                "agent": agora.registry().get_agent(&id).await?,
                "reputation": reputation,
                "balance": balance,
            }))?;
        }
        Command::Sweep { max_age_secs } => {
            let failed = agora
                .tasks()
                .fail_stale_tasks(chrono::Duration::seconds(max_age_secs))
                .await?;
            tracing::info!(failed = failed.len(), "Stale task sweep finished");
            print_json(&failed)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
