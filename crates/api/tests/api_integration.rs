//! Integration tests for the HTTP endpoints.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FunctionInfo, NamedAggregate};
use messaging::{CommandStage, WaitSignal, WaitStrategyRegistrar};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<WaitStrategyRegistrar>) {
    let registrar = Arc::new(WaitStrategyRegistrar::new());
    let app = api::create_app(registrar.clone(), get_metrics_handle());
    (app, registrar)
}

fn signal(command_id: &str, stage: CommandStage) -> WaitSignal {
    WaitSignal::new(
        command_id,
        NamedAggregate::new("shop", "order").aggregate_id("order-1"),
        stage,
        FunctionInfo::new("shop", "order_dispatcher"),
    )
}

fn post_signal(signal: &WaitSignal) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/command/wait")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(signal).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();
    metrics::counter!("commands_dispatched_total").increment(1);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_wait_signal_completes_pending_wait() {
    let (app, registrar) = setup();
    let receiver = registrar.register("cmd-1", CommandStage::Processed).await;
    let sent = signal("cmd-1", CommandStage::Processed);

    let response = app.oneshot(post_signal(&sent)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delivered"], true);
    let received = receiver.await.unwrap();
    assert_eq!(received, sent);
    assert!(!registrar.contains("cmd-1").await);
}

#[tokio::test]
async fn test_earlier_stage_signal_is_not_delivered() {
    let (app, registrar) = setup();
    let _receiver = registrar.register("cmd-2", CommandStage::Projected).await;

    let response = app
        .oneshot(post_signal(&signal("cmd-2", CommandStage::Processed)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delivered"], false);
    assert!(registrar.contains("cmd-2").await);
}

#[tokio::test]
async fn test_signal_for_unknown_command() {
    let (app, _) = setup();

    let response = app
        .oneshot(post_signal(&signal("nobody-waits", CommandStage::Processed)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delivered"], false);
}

#[tokio::test]
async fn test_malformed_signal_is_rejected() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/command/wait")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"commandId": 42}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["errorCode"], "BadRequest");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/commands")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
