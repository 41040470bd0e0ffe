//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use telemetry_lib::{
    agent::{AgentCollector, AgentConfig},
    api::agent::{create_router, AgentState},
    health::{components, HealthRegistry},
    queue::OverflowPolicy,
    tagger::{ClusterIdentity, ResourceTagger},
};
use tower::ServiceExt;

fn collector(capacity: usize, overflow: OverflowPolicy) -> Arc<AgentCollector> {
    let config = AgentConfig {
        agent_id: "edge-a-agent".to_string(),
        buffer_capacity: capacity,
        high_water_mark: capacity,
        overflow_policy: overflow,
        flush_interval: Duration::from_secs(1),
        ..AgentConfig::default()
    };
    let identity = ClusterIdentity::new("edge-a", "eu-west-1", "production").unwrap();
    Arc::new(AgentCollector::new(config, ResourceTagger::new(identity)))
}

async fn setup_test_app(collector: Arc<AgentCollector>) -> (Router, AgentState) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::INGEST).await;
    health_registry.register(components::HUB_LINK).await;

    let state = AgentState::new(collector, health_registry);
    (create_router(state.clone()), state)
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

const METRIC: &str = r#"{
    "resource_attributes": {"k8s.pod.name": "resnet-0", "cluster.name": "spoofed"},
    "payload": {"type": "metric", "name": "gpu_util", "value": 0.82, "unit": "ratio"}
}"#;

#[tokio::test]
async fn test_single_record_is_accepted_and_tagged() {
    let collector = collector(100, OverflowPolicy::DropOldest);
    let (app, _state) = setup_test_app(Arc::clone(&collector)).await;

    let response = app.oneshot(post_json("/v1/records", METRIC)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let summary = json_body(response).await;
    assert_eq!(summary["accepted"], 1);
    assert_eq!(summary["evicted"], 0);

    let batch = collector.assemble_batch().unwrap();
    let record = &batch.records[0];
    assert_eq!(record.attribute("cluster.name"), Some("edge-a"));
    assert_eq!(record.attribute("k8s.pod.name"), Some("resnet-0"));
}

#[tokio::test]
async fn test_record_list_is_accepted() {
    let collector = collector(100, OverflowPolicy::DropOldest);
    let (app, _state) = setup_test_app(Arc::clone(&collector)).await;

    let body = r#"[
        {"payload": {"type": "log", "body": "model loaded", "severity": "info"}},
        {"payload": {"type": "trace", "trace_id": "t1", "span_id": "s1", "name": "predict", "duration_ns": 1200}},
        {"payload": {"type": "metric", "name": "requests", "value": 3.0, "unit": "count"}}
    ]"#;
    let response = app.oneshot(post_json("/v1/records", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["accepted"], 3);
    assert_eq!(collector.buffered(), 3);
}

#[tokio::test]
async fn test_full_buffer_with_drop_oldest_still_accepts() {
    let collector = collector(2, OverflowPolicy::DropOldest);
    let (app, _state) = setup_test_app(collector).await;

    let body = format!("[{METRIC}, {METRIC}, {METRIC}]");
    let response = app.oneshot(post_json("/v1/records", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let summary = json_body(response).await;
    assert_eq!(summary["accepted"], 3);
    assert_eq!(summary["evicted"], 1);
}

#[tokio::test]
async fn test_full_buffer_with_drop_newest_returns_503() {
    let collector = collector(2, OverflowPolicy::DropNewest);
    let (app, _state) = setup_test_app(collector).await;

    let body = format!("[{METRIC}, {METRIC}, {METRIC}]");
    let response = app.oneshot(post_json("/v1/records", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let summary = json_body(response).await;
    assert_eq!(summary["accepted"], 2);
    assert_eq!(summary["rejected"], 1);
}

#[tokio::test]
async fn test_invalid_record_is_client_error() {
    let (app, _state) = setup_test_app(collector(10, OverflowPolicy::DropOldest)).await;

    let response = app
        .oneshot(post_json("/v1/records", r#"{"payload": {"type": "histogram"}}"#))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_stats_reports_counters() {
    let collector = collector(10, OverflowPolicy::DropOldest);
    let (app, _state) = setup_test_app(Arc::clone(&collector)).await;

    app.clone()
        .oneshot(post_json("/v1/records", METRIC))
        .await
        .unwrap();
    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["agent_id"], "edge-a-agent");
    assert_eq!(stats["ingested"], 1);
    assert_eq!(stats["buffered"], 1);
    assert_eq!(stats["circuit_state"], "closed");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app(collector(10, OverflowPolicy::DropOldest)).await;

    // An open hub breaker degrades but does not fail the agent
    state
        .health
        .set_degraded(components::HUB_LINK, "circuit open")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app(collector(10, OverflowPolicy::DropOldest)).await;

    state
        .health
        .set_unhealthy(components::INGEST, "listener failed")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_readiness_flag() {
    let (app, state) = setup_test_app(collector(10, OverflowPolicy::DropOldest)).await;

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["ready"], false);

    state.health.set_ready(true).await;

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let collector = collector(10, OverflowPolicy::DropOldest);
    let (app, _state) = setup_test_app(Arc::clone(&collector)).await;
    app.clone()
        .oneshot(post_json("/v1/records", METRIC))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("telemetry_records_ingested_total"));
}
