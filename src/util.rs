use std::net::IpAddr;

use sysinfo::{Networks, System};

use crate::metrics::HostLabels;

const DEFAULT_METRICS_PORT: u16 = 3000;

pub fn get_default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

const METRICS_PORT: &str = "METRICS_PORT";

pub fn get_metrics_port() -> Option<u16> {
    std::env::var(METRICS_PORT).ok().and_then(|res| res.parse().ok())
}

const SCRAPE_INTERVAL: &str = "SCRAPE_INTERVAL";

pub fn get_scrape_interval() -> Option<u64> {
    std::env::var(SCRAPE_INTERVAL)
        .ok()
        .and_then(|res| res.parse().ok())
}

const AMI_HOST: &str = "AMI_HOST";

pub fn get_ami_host() -> Option<String> {
    std::env::var(AMI_HOST).ok()
}

const AMI_PORT: &str = "AMI_PORT";

pub fn get_ami_port() -> Option<u16> {
    std::env::var(AMI_PORT).ok().and_then(|res| res.parse().ok())
}

const AMI_USERNAME: &str = "AMI_USERNAME";

pub fn get_ami_username() -> Option<String> {
    std::env::var(AMI_USERNAME).ok()
}

const AMI_SECRET: &str = "AMI_SECRET";

pub fn get_ami_secret() -> Option<String> {
    std::env::var(AMI_SECRET).ok()
}

const UNKNOWN_HOST: &str = "unknown";

/// Host name and IPv4 addresses of this machine, read once at startup
pub fn host_labels() -> HostLabels {
    let networks = Networks::new_with_refreshed_list();
    let addrs = networks
        .list()
        .values()
        .flat_map(|data| data.ip_networks().iter().map(|net| net.addr));

    HostLabels {
        hostname: System::host_name().unwrap_or_else(|| UNKNOWN_HOST.to_string()),
        host_ips: format_host_ips(addrs),
    }
}

/// Comma-joined IPv4 addresses, skipping loopback and link-local ones
pub fn format_host_ips(addrs: impl IntoIterator<Item = IpAddr>) -> String {
    let mut ips: Vec<_> = addrs
        .into_iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() => Some(v4),
            _ => None,
        })
        .collect();
    ips.sort();
    ips.dedup();

    ips.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
