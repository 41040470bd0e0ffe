//! Integration tests for the gateway API endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use telemetry_lib::{
    api::gateway::{create_router, GatewayState},
    backpressure::BackpressureController,
    gateway::{GatewayOptions, GatewayPipeline},
    health::{components, HealthRegistry},
    models::{attributes, Batch, Severity, SignalRecord},
    proto::encode_batch,
    sink::{ExporterSink, MemoryBackend, SinkConfig},
};
use tower::ServiceExt;

fn batch(agent: &str) -> Batch {
    Batch::new(
        agent,
        0,
        vec![
            SignalRecord::metric("gpu_util", 0.9, "ratio")
                .with_attribute(attributes::CLUSTER_NAME, "edge-a"),
            SignalRecord::log("scaled up", Severity::Info)
                .with_attribute(attributes::CLUSTER_NAME, "edge-a"),
            SignalRecord::metric("untagged", 1.0, "count"),
        ],
    )
}

async fn setup_test_app(ceiling: u64) -> (Router, GatewayState) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::PIPELINE).await;
    health_registry
        .register(&components::sink("memory"))
        .await;

    let (sink, _worker) = ExporterSink::new(
        SinkConfig::new("memory"),
        Arc::new(MemoryBackend::new(true)),
    );
    let pipeline = Arc::new(GatewayPipeline::new(
        Arc::new(BackpressureController::new(ceiling)),
        vec![sink],
        GatewayOptions::default(),
    ));

    let state = GatewayState::new(pipeline, health_registry);
    (create_router(state.clone()), state)
}

fn push(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/batches")
        .header(header::CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(body))
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

#[tokio::test]
async fn test_push_batch_is_admitted_and_fanned_out() {
    let (app, state) = setup_test_app(1024 * 1024).await;
    let original = batch("edge-a-agent");

    let response = app.oneshot(push(encode_batch(&original))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["batch_id"], original.batch_id.to_string());
    assert_eq!(report["accepted_records"], 2);
    assert_eq!(report["invalid_records"], 1);
    assert_eq!(report["sinks_offered"], 1);
    assert_eq!(report["sinks_accepted"], 1);

    assert_eq!(state.pipeline.sinks()[0].queue_depth(), 1);
}

#[tokio::test]
async fn test_push_over_ceiling_returns_retryable_503() {
    let size = batch("edge-a-agent").estimated_size() as u64;
    let (app, _state) = setup_test_app(size + size / 2).await;

    let first = app
        .clone()
        .oneshot(push(encode_batch(&batch("edge-a-agent"))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(push(encode_batch(&batch("edge-b-agent"))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(second.headers().get(header::RETRY_AFTER).unwrap(), "1");
    let error = json_body(second).await;
    assert_eq!(error["retryable"], true);
}

#[tokio::test]
async fn test_malformed_push_returns_400() {
    let (app, state) = setup_test_app(1024 * 1024).await;

    let response = app
        .oneshot(push(b"\x0a\xff\xff\xff not a batch".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json_body(response).await;
    assert_eq!(error["retryable"], false);
    assert_eq!(state.pipeline.stats().batches_malformed, 1);
}

#[tokio::test]
async fn test_stats_lists_sinks() {
    let (app, _state) = setup_test_app(4096).await;
    app.clone()
        .oneshot(push(encode_batch(&batch("edge-a-agent"))))
        .await
        .unwrap();

    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["batches_admitted"], 1);
    assert_eq!(stats["ceiling_bytes"], 4096);
    assert_eq!(stats["sinks"][0]["name"], "memory");
    assert_eq!(stats["sinks"][0]["kind"], "memory");
    assert_eq!(stats["sinks"][0]["queue_depth"], 1);
    assert_eq!(stats["sinks"][0]["circuit_state"], "closed");
}

#[tokio::test]
async fn test_open_sink_circuit_degrades_health() {
    let (app, state) = setup_test_app(4096).await;

    state
        .health
        .set_degraded(&components::sink("memory"), "circuit open")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["sink.memory"]["status"], "degraded");
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app(4096).await;
    state.health.set_ready(true).await;

    let response = app.oneshot(get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app(4096).await;
    app.clone()
        .oneshot(push(encode_batch(&batch("edge-a-agent"))))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("telemetry_gateway_batches_total"));
}
