//! Prometheus exporter for an Asterisk PBX
//!
//! Polls the Asterisk Manager Interface on a fixed interval and exposes
//! call, extension, registry and trunk gauges over HTTP.

pub mod actors;
pub mod ami;
pub mod api;
pub mod collectors;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scraper;
pub mod util;

pub use error::{QueryError, QueryResult};
