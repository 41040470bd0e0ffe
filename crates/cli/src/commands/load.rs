//! Synthetic load against an agent's ingestion endpoint
//!
//! Workers share a request counter and each post a batch of mixed
//! metric, log and span records, timing every round trip.

use anyhow::{bail, Result};
use colored::Colorize;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use telemetry_lib::models::{attributes, Severity, SignalRecord};
use tokio::task::JoinSet;

use crate::client::ApiClient;
use crate::output::{print_header, print_json, print_success, print_warning, OutputFormat};

const INGEST_PATH: &str = "v1/records";

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub requests: usize,
    pub concurrency: usize,
    pub records_per_request: usize,
    /// Stamped as `cluster.name`; a correctly configured agent overwrites it
    pub cluster_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accepted,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    outcome: Outcome,
    latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub target: String,
    pub requests: usize,
    pub succeeded: usize,
    /// 503 responses: the agent buffer refused under drop-newest
    pub rejected: usize,
    pub failed: usize,
    pub records_sent: usize,
    pub elapsed_secs: f64,
    pub requests_per_sec: f64,
    pub records_per_sec: f64,
    pub latency: LatencySummary,
}

/// Nearest-rank percentile over ascending samples
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Records for one request, rotating through the three signal types
pub fn synthetic_records(request: usize, count: usize, cluster_hint: Option<&str>) -> Vec<SignalRecord> {
    (0..count)
        .map(|i| {
            let seq = request * count + i;
            let record = match seq % 3 {
                0 => SignalRecord::metric("fedtel_load_value", (seq % 100) as f64, "count"),
                1 => SignalRecord::log(format!("synthetic event {request}-{i}"), Severity::Info),
                _ => SignalRecord::span(
                    format!("{:032x}", request as u128 + 1),
                    format!("{:016x}", i + 1),
                    "fedtel-load",
                    1_000_000,
                ),
            };
            let record = record
                .with_attribute(attributes::NAMESPACE, "fedtel-load")
                .with_attribute(attributes::POD, format!("load-{}", request % 8));
            match cluster_hint {
                Some(hint) => record.with_attribute(attributes::CLUSTER_NAME, hint),
                None => record,
            }
        })
        .collect()
}

/// Drive the load and summarize it
pub async fn run_load(client: &ApiClient, options: &LoadOptions) -> Result<LoadReport> {
    if options.requests == 0 {
        bail!("--requests must be at least 1");
    }
    if options.concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let next = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let mut workers = JoinSet::new();

    for _ in 0..options.concurrency.min(options.requests) {
        let client = client.clone();
        let next = Arc::clone(&next);
        let options = options.clone();
        workers.spawn(async move {
            let mut samples = Vec::new();
            loop {
                let request = next.fetch_add(1, Ordering::Relaxed);
                if request >= options.requests {
                    break;
                }
                let records = synthetic_records(
                    request,
                    options.records_per_request,
                    options.cluster_hint.as_deref(),
                );

                let sent = Instant::now();
                let outcome = match client.post_status(INGEST_PATH, &records).await {
                    Ok(status) if status.is_success() => Outcome::Accepted,
                    Ok(status) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                        Outcome::Rejected
                    }
                    _ => Outcome::Failed,
                };
                samples.push(Sample {
                    outcome,
                    latency_ms: sent.elapsed().as_secs_f64() * 1000.0,
                });
            }
            samples
        });
    }

    let mut samples = Vec::with_capacity(options.requests);
    while let Some(joined) = workers.join_next().await {
        samples.extend(joined?);
    }
    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);

    Ok(summarize(client.base_url().as_str(), options, &samples, elapsed))
}

fn summarize(target: &str, options: &LoadOptions, samples: &[Sample], elapsed: f64) -> LoadReport {
    let count = |outcome| samples.iter().filter(|s| s.outcome == outcome).count();
    let succeeded = count(Outcome::Accepted);

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    let records_sent = succeeded * options.records_per_request;
    LoadReport {
        target: target.to_string(),
        requests: samples.len(),
        succeeded,
        rejected: count(Outcome::Rejected),
        failed: count(Outcome::Failed),
        records_sent,
        elapsed_secs: elapsed,
        requests_per_sec: succeeded as f64 / elapsed,
        records_per_sec: records_sent as f64 / elapsed,
        latency: LatencySummary {
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
            max_ms: latencies.last().copied().unwrap_or(0.0),
        },
    }
}

pub async fn generate_load(client: &ApiClient, options: LoadOptions, format: OutputFormat) -> Result<()> {
    let report = run_load(client, &options).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_header("Load Test");
            println!("Target:                 {}", report.target.cyan());
            println!(
                "Requests:               {} ({} records each, concurrency {})",
                report.requests, options.records_per_request, options.concurrency
            );
            println!("Elapsed:                {:.2}s", report.elapsed_secs);
            println!();

            println!("{}", "Throughput".bold());
            println!("{}", "-".repeat(50));
            println!("Requests/sec:           {:.1}", report.requests_per_sec);
            println!("Records/sec:            {:.1}", report.records_per_sec);
            println!();

            println!("{}", "Latency".bold());
            println!("{}", "-".repeat(50));
            println!("p50:                    {:.2}ms", report.latency.p50_ms);
            println!("p95:                    {:.2}ms", report.latency.p95_ms);
            println!("p99:                    {:.2}ms", report.latency.p99_ms);
            println!("max:                    {:.2}ms", report.latency.max_ms);
            println!();

            if report.succeeded == report.requests {
                print_success(&format!("{} requests accepted", report.succeeded));
            } else {
                print_warning(&format!(
                    "{} accepted, {} rejected by a full buffer, {} failed",
                    report.succeeded, report.rejected, report.failed
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_lib::models::SignalType;

    fn options(requests: usize, concurrency: usize) -> LoadOptions {
        LoadOptions {
            requests,
            concurrency,
            records_per_request: 3,
            cluster_hint: None,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&samples, 50.0), 50.0);
        assert_eq!(percentile(&samples, 95.0), 95.0);
        assert_eq!(percentile(&samples, 99.0), 99.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_synthetic_records_mix_signal_types() {
        let records = synthetic_records(0, 6, Some("spoofed"));

        let kinds: Vec<SignalType> = records.iter().map(|r| r.signal_type()).collect();
        assert_eq!(
            kinds,
            vec![
                SignalType::Metric,
                SignalType::Log,
                SignalType::Trace,
                SignalType::Metric,
                SignalType::Log,
                SignalType::Trace,
            ]
        );
        assert!(records
            .iter()
            .all(|r| r.attribute(attributes::CLUSTER_NAME) == Some("spoofed")));
        assert!(synthetic_records(1, 2, None)
            .iter()
            .all(|r| r.attribute(attributes::CLUSTER_NAME).is_none()));
    }

    #[tokio::test]
    async fn test_run_load_sends_every_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/records")
            .with_status(202)
            .with_body(r#"{"accepted":3,"evicted":0,"rejected":0}"#)
            .expect(10)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report = run_load(&client, &options(10, 3)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(report.requests, 10);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.records_sent, 30);
        assert!(report.latency.p50_ms <= report.latency.p99_ms);
    }

    #[tokio::test]
    async fn test_run_load_counts_rejections_separately() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/records")
            .with_status(503)
            .with_body(r#"{"accepted":0,"evicted":0,"rejected":3}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report = run_load(&client, &options(4, 2)).await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.rejected, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(report.records_sent, 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let client = ApiClient::new("http://localhost:8080").unwrap();
        assert!(run_load(&client, &options(5, 0)).await.is_err());
    }
}
