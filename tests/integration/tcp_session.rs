//! Manager sessions over a real socket
//!
//! These tests verify that:
//! - Login succeeds with the right secret and fails loudly otherwise
//! - A full tick works over the wire, including the two-list peer query
//! - A dropped session fails later queries as transport errors

use std::sync::Arc;
use std::time::Duration;

use asterisk_exporter::{
    QueryError,
    ami::{AmiError, ConnectionState, TcpTransport, Transport},
    config::AmiConfig,
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn ami_config(server: &FakeAmi, secret: &str) -> AmiConfig {
    AmiConfig {
        host: server.addr.ip().to_string(),
        port: server.addr.port(),
        username: "exporter".to_string(),
        secret: secret.to_string(),
    }
}

#[tokio::test]
async fn test_login_publishes_connected() {
    let server = FakeAmi::spawn().await;

    let transport = TcpTransport::connect(&ami_config(&server, SECRET))
        .await
        .unwrap();

    assert_eq!(*transport.status().borrow(), ConnectionState::Connected);
    assert_eq!(server.actions().first().map(String::as_str), Some("Login"));
}

#[tokio::test]
async fn test_rejected_login_is_fatal() {
    let server = FakeAmi::spawn().await;

    let result = TcpTransport::connect(&ami_config(&server, "wrong")).await;

    assert_matches!(result, Err(AmiError::ConnectionFailed(_)));
}

#[tokio::test]
async fn test_full_tick_over_tcp() {
    let server = FakeAmi::spawn().await;
    let transport = Arc::new(
        TcpTransport::connect(&ami_config(&server, SECRET))
            .await
            .unwrap(),
    );
    let scraper = create_test_scraper(transport.clone());

    let result = scraper.scrape().await;

    assert!(result.failures().is_empty(), "{:?}", result.failures());
    let calls = result.calls.unwrap();
    assert_eq!(calls.active, None);
    assert_eq!(calls.total, 5);
    let extensions = result.extensions.unwrap();
    assert_eq!((extensions.available, extensions.unavailable), (1, 1));
    let trunk_calls = result.trunks.unwrap();
    let counts = trunk_calls.values().next().unwrap();
    assert_eq!((counts.inbound, counts.outbound), (1, 1));

    transport.logoff().await.unwrap();
}

#[tokio::test]
async fn test_hang_up_fails_queries_as_transport_errors() {
    let server = FakeAmi::spawn().await;
    let transport = Arc::new(
        TcpTransport::connect(&ami_config(&server, SECRET))
            .await
            .unwrap(),
    );
    let mut status = transport.status();
    let scraper = create_test_scraper(transport.clone());

    server.hang_up();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|state| matches!(state, ConnectionState::Disconnected(_))),
    )
    .await
    .unwrap()
    .unwrap();

    assert_matches!(scraper.call_summary().await, Err(QueryError::Transport(_)));
    assert_matches!(scraper.registries().await, Err(QueryError::Transport(_)));
}
