//! Node status from `/stats`

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use telemetry_lib::{agent::AgentStats, gateway::GatewayStats};

use super::sinks::print_sinks;
use crate::client::{ApiClient, NodeStats};
use crate::output::{
    color_circuit, color_count, format_bytes, format_ratio, print_header, print_json,
    OutputFormat,
};

/// Show the stats of whichever node answers at the client's URL
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.stats().await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => match &stats {
            NodeStats::Agent(agent) => print_agent(client, agent),
            NodeStats::Gateway(gateway) => print_gateway(client, gateway),
        },
    }

    Ok(())
}

fn print_agent(client: &ApiClient, stats: &AgentStats) {
    print_header("Agent Status");
    println!("Endpoint:               {}", client.base_url().as_str().cyan());
    println!("Agent:                  {}", stats.agent_id.cyan());
    println!("Hub circuit:            {}", color_circuit(stats.circuit_state));
    println!("Consecutive failures:   {}", stats.consecutive_failures);
    println!("Last flush:             {}", format_timestamp(stats.last_flush));
    println!();

    println!("{}", "Buffer".bold());
    println!("{}", "-".repeat(50));
    println!(
        "Buffered:               {} / {} ({})",
        stats.buffered,
        stats.buffer_capacity,
        format_ratio(stats.buffered as u64, stats.buffer_capacity as u64)
    );
    println!("Outbound batches:       {}", stats.outbound_batches);
    println!("Ingested:               {}", stats.ingested);
    println!("Dropped on overflow:    {}", color_count(stats.dropped_overflow));
    println!("Rejected:               {}", color_count(stats.rejected));
    println!();

    println!("{}", "Delivery".bold());
    println!("{}", "-".repeat(50));
    println!("Batches assembled:      {}", stats.batches_assembled);
    println!("Batches sent:           {}", stats.batches_sent);
    println!("Batches dropped:        {}", color_count(stats.batches_dropped));
    println!("Records sent:           {}", stats.records_sent);
    println!(
        "Records dropped:        {}",
        color_count(stats.records_dropped_outbound + stats.records_discarded_on_shutdown)
    );
}

fn print_gateway(client: &ApiClient, stats: &GatewayStats) {
    print_header("Gateway Status");
    println!("Endpoint:               {}", client.base_url().as_str().cyan());
    println!(
        "Admitted bytes:         {} / {} ({})",
        format_bytes(stats.admitted_bytes),
        format_bytes(stats.ceiling_bytes),
        format_ratio(stats.admitted_bytes, stats.ceiling_bytes)
    );
    println!("Retained batches:       {}", stats.retained_batches);
    println!("Force released:         {}", color_count(stats.force_released));
    println!();

    println!("{}", "Admission".bold());
    println!("{}", "-".repeat(50));
    println!("Batches admitted:       {}", stats.batches_admitted);
    println!("Batches rejected:       {}", color_count(stats.batches_rejected));
    println!("Batches malformed:      {}", color_count(stats.batches_malformed));
    println!("Records accepted:       {}", stats.records_accepted);
    println!("Records invalid:        {}", color_count(stats.records_invalid));
    println!();

    println!("{}", "Sinks".bold());
    print_sinks(&stats.sinks);
}

/// Format timestamp for display
fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}
