use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::trace;

use crate::util;

/// Smallest query budget ever derived from the scrape interval
const MIN_QUERY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ami: AmiConfig,

    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Manager-interface session settings
#[derive(Clone, serde::Deserialize)]
pub struct AmiConfig {
    #[serde(default = "default_ami_host")]
    pub host: String,
    #[serde(default = "default_ami_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: default_ami_host(),
            port: default_ami_port(),
            username: String::new(),
            secret: String::new(),
        }
    }
}

impl std::fmt::Debug for AmiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: IpAddr,
    #[serde(default = "util::get_default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: util::get_default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl ListenConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Per-query budget; half the interval when absent
    pub query_timeout_ms: Option<u64>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            query_timeout_ms: None,
        }
    }
}

impl ScrapeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        self.explicit_query_timeout()
            .unwrap_or_else(|| derived_query_timeout(self.interval()))
    }

    /// The configured query budget, if any
    pub fn explicit_query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// Half the interval, never below [`MIN_QUERY_TIMEOUT`]
pub fn derived_query_timeout(interval: Duration) -> Duration {
    (interval / 2).max(MIN_QUERY_TIMEOUT)
}

fn default_ami_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ami_port() -> u16 {
    5038
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_interval() -> u64 {
    1
}

impl Config {
    /// Apply `AMI_*`, `METRICS_PORT` and `SCRAPE_INTERVAL` from the environment
    pub fn apply_env(&mut self) {
        if let Some(host) = util::get_ami_host() {
            self.ami.host = host;
        }
        if let Some(port) = util::get_ami_port() {
            self.ami.port = port;
        }
        if let Some(username) = util::get_ami_username() {
            self.ami.username = username;
        }
        if let Some(secret) = util::get_ami_secret() {
            self.ami.secret = secret;
        }
        if let Some(port) = util::get_metrics_port() {
            self.listen.port = port;
        }
        if let Some(interval) = util::get_scrape_interval() {
            self.scrape.interval_secs = interval;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scrape.interval_secs == 0 {
            anyhow::bail!("scrape interval must be at least one second");
        }
        if self.scrape.query_timeout_ms == Some(0) {
            anyhow::bail!("query timeout must not be zero");
        }
        if !self.listen.path.starts_with('/') {
            anyhow::bail!("metrics path {:?} must start with '/'", self.listen.path);
        }
        if self.listen.path == "/health" {
            anyhow::bail!("metrics path must not shadow /health");
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
