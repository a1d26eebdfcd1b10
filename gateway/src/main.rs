//! Gateway - CSU session ledger operator binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::SledStore;
use gateway::background::run_round_loop;
use gateway::config::{GatewayConfig, load_config};
use gateway::{GatewayNode, LogTransport, OutboundPacket};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const LEDGER_TREE: &str = "csu_gateway";

#[derive(Parser, Debug)]
#[command(author, version, about = "Gateway - CSU content-distribution session ledger")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the round loop (expiry sweep) until Ctrl-C
    Run,
    /// Print one session as JSON
    Session { session_id: String },
    /// List sessions as JSON
    Sessions {
        /// Only sessions owned by this address
        #[arg(long)]
        owner: Option<String>,
    },
    /// List packets still waiting for an acknowledgement or timeout
    Pending,
}

/// Pending packet as printed by `pending`: the envelope decoded back to JSON.
#[derive(Serialize)]
struct PendingView {
    channel: String,
    sequence: u64,
    timeout_unix: u64,
    packet: serde_json::Value,
}

impl From<OutboundPacket> for PendingView {
    fn from(p: OutboundPacket) -> Self {
        let packet = serde_json::from_slice(&p.data)
            .unwrap_or_else(|_| serde_json::Value::String(hex::encode(&p.data)));
        Self {
            channel: p.source_channel,
            sequence: p.sequence,
            timeout_unix: p.timeout_unix,
            packet,
        }
    }
}

fn open_node(config: &GatewayConfig) -> Result<GatewayNode<SledStore, LogTransport>> {
    let store = SledStore::open(&config.db_path, LEDGER_TREE)
        .with_context(|| format!("Failed to open ledger database at {}", config.db_path.display()))?;
    Ok(GatewayNode::new(store, LogTransport, config.params.clone()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Session { session_id } => {
            let node = open_node(&config)?;
            let session = node
                .session(&session_id)?
                .with_context(|| format!("session {session_id} not found"))?;
            print_json(&session)
        }
        Command::Sessions { owner } => {
            let node = open_node(&config)?;
            let sessions = match owner {
                Some(owner) => node.sessions_by_owner(&owner)?,
                None => node.sessions()?,
            };
            print_json(&sessions)
        }
        Command::Pending => {
            let node = open_node(&config)?;
            let pending: Vec<PendingView> = node
                .pending_packets()?
                .into_iter()
                .map(PendingView::from)
                .collect();
            print_json(&pending)
        }
    }
}

async fn run(config: GatewayConfig) -> Result<()> {
    if config.params.local_admin.is_none() {
        warn!("local_admin is not configured; every CSU handler will be rejected");
    }
    let mut node = open_node(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        db_path = %config.db_path.display(),
        round_interval_secs = config.round_interval_secs,
        local_admin = config.params.local_admin.as_deref().unwrap_or("<unset>"),
        sessions = node.sessions()?.len(),
        pending_packets = node.pending_packets()?.len(),
        "Gateway starting"
    );

    let interval = Duration::from_secs(config.round_interval_secs.max(1));
    run_round_loop(&mut node, interval, |node| {
        if let Err(e) = node.store().flush() {
            warn!(error = %e, "Failed to flush ledger database");
        }
        debug!(metrics = %node.metrics().encode(), "Round complete");
    })
    .await;

    node.store()
        .flush()
        .context("Failed to flush ledger database on shutdown")?;
    info!(metrics = %node.metrics().encode(), "Gateway stopped");
    Ok(())
}
