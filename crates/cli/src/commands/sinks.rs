//! Per-sink delivery view of a gateway

use anyhow::Result;
use tabled::Tabled;
use telemetry_lib::{gateway::GatewayStats, sink::SinkStats};

use crate::client::ApiClient;
use crate::output::{color_circuit, color_count, print_json, print_table, OutputFormat};

/// Row for the sinks table
#[derive(Tabled)]
pub struct SinkRow {
    #[tabled(rename = "Sink")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Delivery")]
    guarantee: &'static str,
    #[tabled(rename = "Queue")]
    queue_depth: String,
    #[tabled(rename = "Delivered")]
    delivered: u64,
    #[tabled(rename = "Dropped")]
    dropped: String,
    #[tabled(rename = "Retries")]
    retries: u64,
    #[tabled(rename = "Circuit")]
    circuit: String,
}

impl From<&SinkStats> for SinkRow {
    fn from(stats: &SinkStats) -> Self {
        let queue_depth = if stats.in_flight {
            format!("{} (+1 in flight)", stats.queue_depth)
        } else {
            stats.queue_depth.to_string()
        };
        Self {
            name: stats.name.clone(),
            kind: stats.kind.to_string(),
            guarantee: if stats.dedup {
                "dedup"
            } else {
                "at-least-once"
            },
            queue_depth,
            delivered: stats.delivered,
            dropped: color_count(stats.dropped()),
            retries: stats.retries,
            circuit: color_circuit(stats.circuit_state),
        }
    }
}

/// Row for the drop breakdown table
#[derive(Tabled)]
struct DropRow {
    #[tabled(rename = "Sink")]
    name: String,
    #[tabled(rename = "Queue full")]
    queue_full: u64,
    #[tabled(rename = "Rejected")]
    permanent: u64,
    #[tabled(rename = "Retries exhausted")]
    exhausted: u64,
    #[tabled(rename = "Shutdown")]
    shutdown: u64,
}

pub fn print_sinks(sinks: &[SinkStats]) {
    let rows: Vec<SinkRow> = sinks.iter().map(SinkRow::from).collect();
    print_table(&rows);
}

/// List queue depth, drops and breaker state for every sink
pub async fn show_sinks(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: GatewayStats = client.get("stats").await?;

    match format {
        OutputFormat::Json => print_json(&stats.sinks)?,
        OutputFormat::Table => {
            print_sinks(&stats.sinks);

            let drops: Vec<DropRow> = stats
                .sinks
                .iter()
                .filter(|s| s.dropped() > 0)
                .map(|s| DropRow {
                    name: s.name.clone(),
                    queue_full: s.dropped_queue_full,
                    permanent: s.dropped_permanent,
                    exhausted: s.dropped_exhausted,
                    shutdown: s.dropped_shutdown,
                })
                .collect();
            if !drops.is_empty() {
                println!();
                print_table(&drops);
            }
        }
    }

    Ok(())
}
