//! Tests for the health and metrics endpoints

use super::*;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serve the router on an ephemeral port and return its base URL
async fn spawn_router(
    readiness: ReadinessState,
    metrics: SharedMetrics,
) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = router(readiness, metrics);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), handle)
}

async fn get(url: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("request to health server")
}

#[tokio::test]
async fn test_healthz_is_always_ok() {
    // ARRANGE
    let metrics = create_metrics().expect("create metrics");
    let (base, handle) = spawn_router(ReadinessState::new(), metrics).await;

    // ACT
    let response = get(&format!("{}/healthz", base)).await;

    // ASSERT
    assert_eq!(response.status(), 200);
    handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    // ARRANGE
    let readiness = ReadinessState::new();
    let metrics = create_metrics().expect("create metrics");
    let (base, handle) = spawn_router(readiness.clone(), metrics).await;

    // ACT + ASSERT: not ready until the controller starts watching
    let before = get(&format!("{}/readyz", base)).await;
    assert_eq!(before.status(), 503);

    readiness.set_ready();
    let after = get(&format!("{}/readyz", base)).await;
    assert_eq!(after.status(), 200);

    handle.abort();
}

#[test]
fn test_readiness_state_is_shared_between_clones() {
    let readiness = ReadinessState::new();
    let observer = readiness.clone();
    assert!(!observer.is_ready());

    readiness.set_ready();

    assert!(observer.is_ready());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_sync_outcomes() {
    // ARRANGE
    let metrics = create_metrics().expect("create metrics");
    metrics.record_reconciliation_success("started", 0.02);
    let (base, handle) = spawn_router(ReadinessState::new(), metrics).await;

    // ACT
    let response = get(&format!("{}/metrics", base)).await;

    // ASSERT
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = response.text().await.expect("metrics body");
    assert!(body.contains("stratum_sync_outcomes_total{outcome=\"started\"} 1"));
    assert!(body.contains("stratum_reconciliations_total{result=\"success\"} 1"));

    handle.abort();
}

#[tokio::test]
async fn test_run_health_server_binds_configured_port() {
    // ARRANGE
    let port = 28_181;
    let metrics = create_metrics().expect("create metrics");
    let handle = tokio::spawn(run_health_server(port, ReadinessState::new(), metrics));

    // ACT: retry until the listener is up
    let client = reqwest::Client::new();
    let mut status = None;
    for _ in 0..20 {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(200))
            .send()
            .await
        {
            Ok(response) => {
                status = Some(response.status());
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }

    // ASSERT
    assert_eq!(status.map(|s| s.as_u16()), Some(200));
    handle.abort();
}
