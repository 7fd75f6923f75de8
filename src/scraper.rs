//! The four logical queries of one scrape tick
//!
//! Queries run strictly one after another through the shared
//! [`Correlator`]; a failing family never prevents the remaining ones from
//! running. The trunk query reuses the trunk identities discovered by the
//! extensions query of the same tick.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument};

use crate::ami::{Action, Correlator, QuerySpec};
use crate::collectors::{
    CallSummary, ExtensionSummary, RegistrySummary, TrunkCalls, TrunkIdentity,
    channels::{CORE_SHOW_CHANNEL, CORE_SHOW_CHANNELS_COMPLETE},
    classify_channels, classify_peers, classify_registries, parse_call_summary,
    peers::{PEER_ENTRY, PEERLIST_COMPLETE},
    registries::{REGISTRATIONS_COMPLETE, REGISTRY_ENTRY},
};
use crate::error::{QueryError, QueryResult};

/// Aggregate of one tick, consumed by the metrics sink and then dropped
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult {
    pub calls: QueryResult<CallSummary>,
    pub extensions: QueryResult<ExtensionSummary>,
    pub registries: QueryResult<RegistrySummary>,
    pub trunks: QueryResult<TrunkCalls>,
}

impl ScrapeResult {
    /// Families that failed this tick, with their errors
    pub fn failures(&self) -> Vec<(&'static str, QueryError)> {
        let mut failures = Vec::new();
        if let Err(e) = &self.calls {
            failures.push(("calls", e.clone()));
        }
        if let Err(e) = &self.extensions {
            failures.push(("extensions", e.clone()));
        }
        if let Err(e) = &self.registries {
            failures.push(("registries", e.clone()));
        }
        if let Err(e) = &self.trunks {
            failures.push(("trunks", e.clone()));
        }
        failures
    }
}

pub fn call_summary_action() -> Action {
    Action::new("Command").param("Command", "core show channels")
}

/// SIP and IAX peer lists, each ending with its own `PeerlistComplete`
pub fn extensions_query() -> QuerySpec {
    QuerySpec::new("extensions")
        .action(Action::new("SIPPeers"))
        .action(Action::new("IAXpeerlist"))
        .stream(PEER_ENTRY)
        .terminal(PEERLIST_COMPLETE)
}

pub fn registries_query() -> QuerySpec {
    QuerySpec::new("registries")
        .action(Action::new("SIPshowregistry"))
        .stream(REGISTRY_ENTRY)
        .terminal(REGISTRATIONS_COMPLETE)
}

pub fn channels_query() -> QuerySpec {
    QuerySpec::new("trunks")
        .action(Action::new("CoreShowChannels"))
        .stream(CORE_SHOW_CHANNEL)
        .terminal(CORE_SHOW_CHANNELS_COMPLETE)
}

/// Issues the scrape queries against one switch
pub struct AsteriskScraper {
    correlator: Arc<Correlator>,

    /// Budget for each individual query
    timeout: Duration,
}

impl AsteriskScraper {
    pub fn new(correlator: Arc<Correlator>, timeout: Duration) -> Self {
        Self {
            correlator,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub async fn call_summary(&self) -> QueryResult<CallSummary> {
        let response = self
            .correlator
            .command(&call_summary_action(), self.timeout)
            .await?;
        parse_call_summary(&response)
    }

    pub async fn extensions(&self) -> QueryResult<ExtensionSummary> {
        let records = self
            .correlator
            .query(&extensions_query(), self.timeout)
            .await?;
        Ok(classify_peers(&records))
    }

    pub async fn registries(&self) -> QueryResult<RegistrySummary> {
        let records = self
            .correlator
            .query(&registries_query(), self.timeout)
            .await?;
        Ok(classify_registries(&records))
    }

    /// Inbound/outbound calls per trunk; no query is sent without trunks
    pub async fn trunk_calls(&self, trunks: &BTreeSet<TrunkIdentity>) -> QueryResult<TrunkCalls> {
        if trunks.is_empty() {
            return Ok(TrunkCalls::new());
        }

        let records = self
            .correlator
            .query(&channels_query(), self.timeout)
            .await?;
        Ok(classify_channels(&records, trunks))
    }

    #[instrument(skip(self))]
    pub async fn scrape(&self) -> ScrapeResult {
        let calls = self.call_summary().await;
        let extensions = self.extensions().await;
        let registries = self.registries().await;
        let trunks = match &extensions {
            Ok(summary) => self.trunk_calls(&summary.trunks).await,
            Err(e) => Err(e.clone()),
        };

        let result = ScrapeResult {
            calls,
            extensions,
            registries,
            trunks,
        };

        for (family, e) in result.failures() {
            match e {
                QueryError::Busy(_) => {
                    error!(family, "single-flight violation, query rejected: {e}")
                }
                _ => error!(family, "query failed: {e}"),
            }
        }
        debug!("scrape finished with {} failed families", result.failures().len());

        result
    }
}
