//! Prometheus gauges fed by the scrape scheduler
//!
//! Every gauge carries the host identity labels (`hostname`, `host_ips`).
//! A family that could not be computed in a tick is exported as
//! [`UNKNOWN`]; labeled families (per trunk, per peer) mark every series
//! they exported before as unknown instead of dropping them.

use std::collections::BTreeSet;
use std::sync::Mutex;

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::trace;

use crate::collectors::ExtensionSummary;
use crate::scraper::ScrapeResult;

/// Sentinel for values that are unknown this tick
pub const UNKNOWN: f64 = -1.0;

const NAMESPACE: &str = "asterisk";

const HOST_LABELS: [&str; 2] = ["hostname", "host_ips"];

/// Fixed identity of the machine the exporter runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLabels {
    pub hostname: String,

    /// Comma-separated IPv4 addresses
    pub host_ips: String,
}

/// Gauge vector whose series set changes from tick to tick
struct LabeledFamily {
    gauge: GaugeVec,
    known: Mutex<BTreeSet<Vec<String>>>,
}

impl LabeledFamily {
    fn new(subsystem: &str, name: &str, help: &str, extra: &[&str]) -> prometheus::Result<Self> {
        let labels: Vec<&str> = HOST_LABELS.iter().chain(extra).copied().collect();
        let gauge = GaugeVec::new(
            Opts::new(name, help)
                .namespace(NAMESPACE)
                .subsystem(subsystem),
            &labels,
        )?;

        Ok(Self {
            gauge,
            known: Mutex::new(BTreeSet::new()),
        })
    }

    /// Replace the exported series with exactly `series`
    ///
    /// New values are written before stale series are removed, so a gather
    /// running alongside never sees the family empty.
    fn replace(&self, host: &HostLabels, series: Vec<(Vec<String>, f64)>) {
        let mut current = BTreeSet::new();
        for (extra, value) in series {
            self.set(host, &extra, value);
            current.insert(extra);
        }

        let Ok(mut known) = self.known.lock() else {
            return;
        };
        for stale in known.difference(&current) {
            if let Err(e) = self
                .gauge
                .remove_label_values(label_values(host, stale).as_slice())
            {
                trace!("stale series {stale:?} already gone: {e}");
            }
        }
        *known = current;
    }

    fn mark_unknown(&self, host: &HostLabels) {
        let known = self
            .known
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        for extra in &known {
            self.set(host, extra, UNKNOWN);
        }
    }

    fn set(&self, host: &HostLabels, extra: &[String], value: f64) {
        self.gauge
            .with_label_values(label_values(host, extra).as_slice())
            .set(value);
    }
}

fn label_values<'a>(host: &'a HostLabels, extra: &'a [String]) -> Vec<&'a str> {
    [host.hostname.as_str(), host.host_ips.as_str()]
        .into_iter()
        .chain(extra.iter().map(String::as_str))
        .collect()
}

/// All gauges exported for one switch
pub struct AsteriskMetrics {
    registry: Registry,
    host: HostLabels,

    calls_active: Gauge,
    calls_total: Gauge,

    extensions_total: Gauge,
    extensions_available: Gauge,
    extensions_unavailable: Gauge,

    registries_total: Gauge,
    registries_active: Gauge,
    registries_down: Gauge,

    trunk_calls: LabeledFamily,
    peer_latency: LabeledFamily,
}

impl AsteriskMetrics {
    /// Create the gauges and register them in a fresh registry
    pub fn new(host: HostLabels) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let host_gauge = |subsystem: &str, name: &str, help: &str| -> prometheus::Result<Gauge> {
            let vec = GaugeVec::new(
                Opts::new(name, help)
                    .namespace(NAMESPACE)
                    .subsystem(subsystem),
                &HOST_LABELS,
            )?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec.with_label_values(&[host.hostname.as_str(), host.host_ips.as_str()]))
        };

        let calls_active = host_gauge("calls", "active", "The number of active calls")?;
        let calls_total = host_gauge("calls", "total", "The number of total processed calls")?;
        let extensions_total = host_gauge(
            "extensions",
            "total",
            "Total number of extensions regardless of their status",
        )?;
        let extensions_available = host_gauge(
            "extensions",
            "available",
            "Number of available extensions",
        )?;
        let extensions_unavailable = host_gauge(
            "extensions",
            "unavailable",
            "Number of unavailable extensions",
        )?;
        let registries_total =
            host_gauge("registries", "total", "Total number of registries")?;
        let registries_active =
            host_gauge("registries", "active", "Number of registered registries")?;
        let registries_down =
            host_gauge("registries", "down", "Number of unregistered registries")?;

        let trunk_calls = LabeledFamily::new(
            "trunks",
            "calls",
            "Calls currently routed over a trunk, by direction",
            &["trunk", "direction"],
        )?;
        registry.register(Box::new(trunk_calls.gauge.clone()))?;

        let peer_latency = LabeledFamily::new(
            "peers",
            "latency_milliseconds",
            "Qualify latency of an extension, -1 when unknown",
            &["peer"],
        )?;
        registry.register(Box::new(peer_latency.gauge.clone()))?;

        Ok(Self {
            registry,
            host,
            calls_active,
            calls_total,
            extensions_total,
            extensions_available,
            extensions_unavailable,
            registries_total,
            registries_active,
            registries_down,
            trunk_calls,
            peer_latency,
        })
    }

    /// Write one tick into the gauges
    pub fn record(&self, result: &ScrapeResult) {
        match &result.calls {
            Ok(calls) => {
                self.calls_active
                    .set(calls.active.map_or(UNKNOWN, |active| active as f64));
                self.calls_total.set(calls.total as f64);
            }
            Err(_) => {
                self.calls_active.set(UNKNOWN);
                self.calls_total.set(UNKNOWN);
            }
        }

        match &result.extensions {
            Ok(extensions) => {
                self.extensions_total.set(extensions.total() as f64);
                self.extensions_available.set(extensions.available as f64);
                self.extensions_unavailable
                    .set(extensions.unavailable as f64);
                self.peer_latency
                    .replace(&self.host, latency_series(extensions));
            }
            Err(_) => {
                self.extensions_total.set(UNKNOWN);
                self.extensions_available.set(UNKNOWN);
                self.extensions_unavailable.set(UNKNOWN);
                self.peer_latency.mark_unknown(&self.host);
            }
        }

        match &result.registries {
            Ok(registries) => {
                self.registries_total.set(registries.total() as f64);
                self.registries_active.set(registries.registered as f64);
                self.registries_down.set(registries.unregistered as f64);
            }
            Err(_) => {
                self.registries_total.set(UNKNOWN);
                self.registries_active.set(UNKNOWN);
                self.registries_down.set(UNKNOWN);
            }
        }

        match &result.trunks {
            Ok(trunks) => {
                let series = trunks
                    .iter()
                    .flat_map(|(trunk, counts)| {
                        [
                            (
                                vec![trunk.to_string(), "inbound".to_string()],
                                counts.inbound as f64,
                            ),
                            (
                                vec![trunk.to_string(), "outbound".to_string()],
                                counts.outbound as f64,
                            ),
                        ]
                    })
                    .collect();
                self.trunk_calls.replace(&self.host, series);
            }
            Err(_) => self.trunk_calls.mark_unknown(&self.host),
        }

        trace!("recorded scrape result");
    }

    /// Render every gauge in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn latency_series(extensions: &ExtensionSummary) -> Vec<(Vec<String>, f64)> {
    extensions
        .extensions
        .iter()
        .map(|peer| {
            (
                vec![format!("{}/{}", peer.technology, peer.name)],
                peer.latency_ms.unwrap_or(UNKNOWN),
            )
        })
        .collect()
}
