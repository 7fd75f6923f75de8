use std::sync::Arc;

use anyhow::Context;
use asterisk_exporter::{
    actors::SchedulerHandle,
    ami::{ConnectionState, Correlator, FlightPolicy, TcpTransport, Transport},
    api::{self, ApiConfig, ApiState},
    config::{Config, read_config_file},
    metrics::AsteriskMetrics,
    scraper::AsteriskScraper,
    util,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Port to serve the metrics on
    #[arg(long)]
    port: Option<u16>,

    /// Scrape interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_target("asterisk_exporter", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.file {
        Some(path) => read_config_file(path).with_context(|| format!("failed to read {path}"))?,
        None => Config::default(),
    };

    config.apply_env();

    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(interval) = args.interval {
        config.scrape.interval_secs = interval;
    }

    config.validate()?;
    Ok(config)
}

/// Log every change of the manager session state
fn watch_connection(mut status: watch::Receiver<ConnectionState>) {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = status.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => info!("manager interface connected"),
                ConnectionState::Disconnected(reason) => {
                    error!("manager interface disconnected: {reason}")
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = load_config(&args)?;
    debug!("effective config: {config:?}");

    let transport = Arc::new(
        TcpTransport::connect(&config.ami)
            .await
            .context("could not open manager session")?,
    );
    let status = transport.status();
    watch_connection(status.clone());

    let host = util::host_labels();
    info!("exporting as {} ({})", host.hostname, host.host_ips);
    let metrics = Arc::new(AsteriskMetrics::new(host)?);

    let correlator = Arc::new(Correlator::new(transport.clone(), FlightPolicy::Reject));
    let scraper = AsteriskScraper::new(correlator, config.scrape.query_timeout());
    let scheduler = SchedulerHandle::spawn(
        scraper,
        metrics.clone(),
        config.scrape.interval(),
        config.scrape.explicit_query_timeout(),
    );

    let api_config = ApiConfig {
        bind_addr: config.listen.socket_addr(),
        metrics_path: config.listen.path.clone(),
    };
    api::spawn_api_server(api_config, ApiState::new(metrics, status)).await?;

    shutdown_signal().await;
    info!("shutting down");

    scheduler.shutdown().await?;
    scheduler.stopped().await;

    if let Err(e) = transport.logoff().await {
        warn!("logoff failed: {e}");
    }

    Ok(())
}
