//! Peer classification: extension availability and trunk identities
//!
//! `PeerEntry` records come from both `SIPPeers` and `IAXpeerlist`. Dynamic
//! peers are end-user extensions and are counted as available/unavailable;
//! static peers are trunks and only contribute their identity.

use std::collections::BTreeSet;
use std::fmt;

use crate::ami::Event;

/// Peer record event type
pub const PEER_ENTRY: &str = "PeerEntry";

/// Terminal event of both peer list actions
pub const PEERLIST_COMPLETE: &str = "PeerlistComplete";

/// `"<technology>/<name>"` key of a static peer, as it appears in channel names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrunkIdentity(String);

impl TrunkIdentity {
    pub fn new(technology: &str, name: &str) -> Self {
        Self(format!("{}/{name}", normalize_technology(technology)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrunkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived view of one `PeerEntry` record
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEntry {
    pub name: String,
    pub ip: Option<String>,

    /// Status word, e.g. "OK", "UNREACHABLE"
    pub status: String,

    pub latency_ms: Option<f64>,

    /// Normalized channel technology ("SIP", "IAX2")
    pub technology: String,

    pub dynamic: bool,
}

impl PeerEntry {
    pub fn from_event(event: &Event) -> Self {
        let (status, latency_ms) = parse_status(event.get("Status").unwrap_or_default());

        Self {
            name: event.get("ObjectName").unwrap_or_default().to_string(),
            ip: event
                .get("IPaddress")
                .filter(|ip| !ip.is_empty() && *ip != "-none-")
                .map(str::to_string),
            status,
            latency_ms,
            technology: normalize_technology(event.get("Channeltype").unwrap_or_default()),
            dynamic: event
                .get("Dynamic")
                .is_some_and(|d| d.eq_ignore_ascii_case("yes")),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status.contains("OK")
    }

    /// Trunk key, only static peers are trunks
    pub fn trunk_identity(&self) -> Option<TrunkIdentity> {
        (!self.dynamic).then(|| TrunkIdentity::new(&self.technology, &self.name))
    }
}

/// Result of classifying one peer snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionSummary {
    pub available: u64,
    pub unavailable: u64,

    /// Dynamic peers in arrival order
    pub extensions: Vec<PeerEntry>,

    pub trunks: BTreeSet<TrunkIdentity>,
}

impl ExtensionSummary {
    pub fn total(&self) -> u64 {
        self.available + self.unavailable
    }
}

/// Split a status like `"OK (23 ms)"` into word and latency
pub fn parse_status(status: &str) -> (String, Option<f64>) {
    let mut tokens = status.split_whitespace();
    let word = tokens.next().unwrap_or_default().to_string();
    let latency = tokens.next().and_then(|token| {
        let mut chars = token.chars();
        match chars.next() {
            Some(c) if !c.is_ascii_digit() => chars.as_str().parse().ok(),
            _ => token.parse().ok(),
        }
    });

    (word, latency)
}

/// Channel names use "IAX2" while peer lists report "IAX"
pub fn normalize_technology(technology: &str) -> String {
    if technology.eq_ignore_ascii_case("IAX") {
        "IAX2".to_string()
    } else {
        technology.to_string()
    }
}

pub fn classify_peers(records: &[Event]) -> ExtensionSummary {
    let mut summary = ExtensionSummary::default();

    for record in records.iter().filter(|r| r.name == PEER_ENTRY) {
        let peer = PeerEntry::from_event(record);

        if let Some(trunk) = peer.trunk_identity() {
            summary.trunks.insert(trunk);
            continue;
        }

        if peer.is_available() {
            summary.available += 1;
        } else {
            summary.unavailable += 1;
        }
        summary.extensions.push(peer);
    }

    summary
}
