//! Integration tests for the HTTP exposition
//!
//! These tests verify that:
//! - The metrics route serves the Prometheus text format
//! - The metrics path is configurable
//! - The health route reports the manager session state

use std::net::SocketAddr;

use asterisk_exporter::{
    ami::{ConnectionState, MemoryTransport, Transport},
    api::{ApiConfig, ApiState, spawn_api_server},
};
use serde_json::Value;
use tokio::sync::watch;

use crate::helpers::*;

async fn spawn_test_api(path: &str, connection: watch::Receiver<ConnectionState>) -> SocketAddr {
    let transport = memory_pbx();
    let metrics = create_test_metrics();
    metrics.record(&create_test_scraper(transport).scrape().await);

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_path: path.to_string(),
    };

    spawn_api_server(config, ApiState::new(metrics, connection))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let transport = MemoryTransport::new();
    let addr = spawn_test_api("/metrics", transport.status()).await;

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = response.text().await.unwrap();
    assert!(body.contains("# TYPE asterisk_calls_active gauge"));
    assert!(body.contains(&host_sample("asterisk_calls_total", 42.0)));
}

#[tokio::test]
async fn test_custom_metrics_path() {
    let transport = MemoryTransport::new();
    let addr = spawn_test_api("/asterisk", transport.status()).await;

    let custom = reqwest::get(format!("http://{addr}/asterisk")).await.unwrap();
    let default = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();

    assert_eq!(custom.status(), reqwest::StatusCode::OK);
    assert_eq!(default.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_session_state() {
    let transport = MemoryTransport::new();
    let addr = spawn_test_api("/metrics", transport.status()).await;

    let body = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ami_connected"], true);
    assert!(health["timestamp"].is_string());

    transport.disconnect("test");
    let body = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ami_connected"], false);
}
