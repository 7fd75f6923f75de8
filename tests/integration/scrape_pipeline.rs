//! Scrape ticks against the in-memory switch
//!
//! These tests verify that:
//! - One tick fills every gauge family
//! - Ticks release every subscription they take
//! - Repeated ticks over the same state export identical text
//! - Failed families read -1, including previously exported labeled series
//! - Records carrying a foreign ActionID never reach a tick

use std::sync::Arc;

use asterisk_exporter::{
    actors::{SchedulerHandle, SchedulerState},
    ami::{Event, memory::Reply},
    metrics::UNKNOWN,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_full_tick_exports_every_family() {
    let transport = memory_pbx();
    let scraper = create_test_scraper(transport);
    let metrics = create_test_metrics();

    let result = scraper.scrape().await;
    assert!(result.failures().is_empty(), "{:?}", result.failures());
    metrics.record(&result);

    let text = metrics.encode().unwrap();
    for expected in [
        host_sample("asterisk_calls_active", 1.0),
        host_sample("asterisk_calls_total", 42.0),
        host_sample("asterisk_extensions_total", 2.0),
        host_sample("asterisk_extensions_available", 1.0),
        host_sample("asterisk_extensions_unavailable", 1.0),
        host_sample("asterisk_registries_total", 2.0),
        host_sample("asterisk_registries_active", 1.0),
        host_sample("asterisk_registries_down", 1.0),
    ] {
        assert!(text.contains(&expected), "missing {expected:?} in\n{text}");
    }
    assert!(text.contains(
        r#"asterisk_trunks_calls{direction="inbound",host_ips="10.0.0.2",hostname="pbx-test",trunk="SIP/provider1"} 1"#
    ));
    assert!(text.contains(
        r#"asterisk_trunks_calls{direction="outbound",host_ips="10.0.0.2",hostname="pbx-test",trunk="SIP/provider1"} 1"#
    ));
    assert!(text.contains(
        r#"asterisk_peers_latency_milliseconds{host_ips="10.0.0.2",hostname="pbx-test",peer="SIP/1001"} 12"#
    ));
    assert!(text.contains(
        r#"asterisk_peers_latency_milliseconds{host_ips="10.0.0.2",hostname="pbx-test",peer="SIP/1002"} -1"#
    ));
}

#[tokio::test]
async fn test_tick_releases_subscriptions() {
    let transport = memory_pbx();
    let scraper = create_test_scraper(transport.clone());

    scraper.scrape().await;
    scraper.scrape().await;

    assert_eq!(transport.subscription_count(), 0);
}

#[tokio::test]
async fn test_repeated_ticks_are_idempotent() {
    let scraper = create_test_scraper(memory_pbx());
    let metrics = create_test_metrics();

    metrics.record(&scraper.scrape().await);
    let first = metrics.encode().unwrap();
    metrics.record(&scraper.scrape().await);
    let second = metrics.encode().unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_failed_peer_list_marks_trunks_unknown() {
    let transport = memory_pbx();
    let scraper = create_test_scraper(transport.clone());
    let metrics = create_test_metrics();
    metrics.record(&scraper.scrape().await);

    transport.script("SIPPeers", Reply::new().failure("socket closed"));
    let result = scraper.scrape().await;
    metrics.record(&result);

    let families: Vec<&str> = result.failures().iter().map(|(f, _)| *f).collect();
    assert_eq!(families, vec!["extensions", "trunks"]);

    let text = metrics.encode().unwrap();
    assert!(text.contains(&host_sample("asterisk_extensions_total", UNKNOWN)));
    assert!(text.contains(&host_sample("asterisk_calls_total", 42.0)));
    assert!(text.contains(
        r#"asterisk_trunks_calls{direction="outbound",host_ips="10.0.0.2",hostname="pbx-test",trunk="SIP/provider1"} -1"#
    ));
    assert!(text.contains(
        r#"asterisk_peers_latency_milliseconds{host_ips="10.0.0.2",hostname="pbx-test",peer="SIP/1001"} -1"#
    ));
}

#[tokio::test]
async fn test_foreign_records_do_not_reach_the_tick() {
    let transport = memory_pbx();
    transport.script(
        "SIPPeers",
        Reply::new()
            .uncorrelated(peer_entry("9999", "yes", "OK (1 ms)").with("ActionID", "other-client-7"))
            .event(peer_entry("1001", "yes", "OK (12 ms)"))
            .event(Event::new("PeerlistComplete")),
    );
    let scraper = create_test_scraper(transport);

    let extensions = scraper.extensions().await.unwrap();

    assert_eq!(extensions.total(), 1);
    assert_eq!(extensions.extensions[0].name, "1001");
}

#[tokio::test]
async fn test_scheduler_drives_the_gauges() {
    let transport = memory_pbx();
    let metrics = create_test_metrics();
    let scheduler = SchedulerHandle::spawn(
        create_test_scraper(transport),
        Arc::clone(&metrics),
        std::time::Duration::from_secs(3600),
        None,
    );

    let report = scheduler.scrape_now().await.unwrap();
    assert!(report.is_complete());
    assert!(
        metrics
            .encode()
            .unwrap()
            .contains(&host_sample("asterisk_calls_total", 42.0))
    );

    scheduler.shutdown().await.unwrap();
    scheduler.stopped().await;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_concurrent_queries_never_mix_records() {
    use asterisk_exporter::ami::{Correlator, FlightPolicy};
    use asterisk_exporter::scraper::{AsteriskScraper, extensions_query, registries_query};
    use std::time::Duration;

    let transport = memory_pbx();
    transport.script(
        "SIPPeers",
        Reply::new()
            .delay(Duration::from_millis(50))
            .event(peer_entry("1001", "yes", "OK (12 ms)"))
            .event(Event::new("PeerlistComplete")),
    );
    let correlator = Arc::new(Correlator::new(transport.clone(), FlightPolicy::Queue));
    let extensions = AsteriskScraper::new(correlator.clone(), Duration::from_secs(1));
    let registries = AsteriskScraper::new(correlator.clone(), Duration::from_secs(1));

    let (peers, regs) = futures::future::join(extensions.extensions(), registries.registries()).await;

    assert_eq!(peers.unwrap().total(), 1);
    assert_eq!(regs.unwrap().total(), 2);
    assert_eq!(transport.subscription_count(), 0);

    let rejecting = Correlator::new(transport, FlightPolicy::Reject);
    let (first, second) = futures::future::join(
        rejecting.query(&extensions_query(), Duration::from_secs(1)),
        rejecting.query(&registries_query(), Duration::from_secs(1)),
    )
    .await;
    assert!(first.is_ok());
    assert_matches::assert_matches!(second, Err(asterisk_exporter::QueryError::Busy(_)));
}
