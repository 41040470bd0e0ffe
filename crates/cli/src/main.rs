//! Federated telemetry CLI
//!
//! Inspects agents and the gateway through their `/stats` endpoints and
//! drives synthetic load at an agent's ingestion API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{load, sinks, status};

/// Federated telemetry CLI
#[derive(Parser)]
#[command(name = "fedtel")]
#[command(author, version, about = "CLI for the federated telemetry pipeline", long_about = None)]
pub struct Cli {
    /// Output format (falls back to the config file, then table)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show agent or gateway stats, detected from the response
    Status {
        /// Node API URL; defaults to the configured agent
        #[arg(long, env = "FEDTEL_TARGET")]
        target: Option<String>,
    },

    /// List per-sink queue depth, drops and circuit state
    Sinks {
        /// Gateway API URL
        #[arg(long, env = "FEDTEL_GATEWAY_URL")]
        gateway: Option<String>,
    },

    /// Send synthetic records to an agent and report throughput and latency
    Load {
        /// Agent API URL
        #[arg(long, env = "FEDTEL_AGENT_URL")]
        agent: Option<String>,

        /// Total number of ingestion requests
        #[arg(long, default_value_t = 1000)]
        requests: usize,

        /// Requests in flight at once
        #[arg(long, default_value_t = 8)]
        concurrency: usize,

        /// Records per request, rotating metric, log and span
        #[arg(long, default_value_t = 10)]
        records_per_request: usize,

        /// Stamp records with this cluster.name to check the agent overwrites it
        #[arg(long)]
        cluster_hint: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = config.format(cli.format);

    match cli.command {
        Commands::Status { target } => {
            let client = client::ApiClient::new(&config.agent_url(target))?;
            status::show_status(&client, format).await?;
        }
        Commands::Sinks { gateway } => {
            let client = client::ApiClient::new(&config.gateway_url(gateway))?;
            sinks::show_sinks(&client, format).await?;
        }
        Commands::Load {
            agent,
            requests,
            concurrency,
            records_per_request,
            cluster_hint,
        } => {
            let client = client::ApiClient::new(&config.agent_url(agent))?;
            let options = load::LoadOptions {
                requests,
                concurrency,
                records_per_request,
                cluster_hint,
            };
            load::generate_load(&client, options, format).await?;
        }
    }

    Ok(())
}
