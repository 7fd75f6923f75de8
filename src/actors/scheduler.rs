//! ScrapeSchedulerActor - Runs one scrape tick per interval
//!
//! Each tick runs the four logical queries through the [`AsteriskScraper`]
//! and writes the aggregate into the [`AsteriskMetrics`]. The aggregate is
//! dropped afterwards; only the gauges keep state between ticks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

use crate::config::derived_query_timeout;
use crate::metrics::AsteriskMetrics;
use crate::scraper::AsteriskScraper;

use super::messages::{SchedulerCommand, SchedulerState, ScrapeReport};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Actor that owns the scrape loop of one switch
pub struct ScrapeSchedulerActor {
    scraper: AsteriskScraper,

    metrics: Arc<AsteriskMetrics>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    state_tx: watch::Sender<SchedulerState>,

    period: Duration,

    /// Configured query budget; derived from the period when `None`
    query_timeout: Option<Duration>,

    /// Ticks run so far
    ticks: u64,
}

impl ScrapeSchedulerActor {
    pub fn new(
        scraper: AsteriskScraper,
        metrics: Arc<AsteriskMetrics>,
        period: Duration,
        query_timeout: Option<Duration>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        state_tx: watch::Sender<SchedulerState>,
    ) -> Self {
        Self {
            scraper,
            metrics,
            command_rx,
            state_tx,
            period: period.max(MIN_PERIOD),
            query_timeout,
            ticks: 0,
        }
    }

    fn query_timeout_for(&self, period: Duration) -> Duration {
        self.query_timeout
            .unwrap_or_else(|| derived_query_timeout(period))
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(period = ?self.period))]
    pub async fn run(mut self) {
        debug!("starting scrape scheduler");

        let mut ticker = ticker(self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if !report.is_complete() {
                        debug!(
                            tick = report.tick,
                            "{} families unknown this tick",
                            report.failures.len()
                        );
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::ScrapeNow { respond_to } => {
                            debug!("received ScrapeNow command");
                            let report = self.tick().await;
                            let _ = respond_to.send(report);
                        }

                        SchedulerCommand::UpdateInterval { interval_secs } => {
                            if interval_secs == 0 {
                                warn!("ignoring zero scrape interval");
                                continue;
                            }
                            self.period = Duration::from_secs(interval_secs);
                            let query_timeout = self.query_timeout_for(self.period);
                            self.scraper.set_timeout(query_timeout);
                            debug!(
                                "updating interval to {interval_secs}s, query timeout {:?}",
                                self.scraper.timeout()
                            );
                            ticker = ticker_after(self.period);
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        self.state_tx.send_replace(SchedulerState::Stopped);
        info!("scrape scheduler stopped after {} ticks", self.ticks);
    }

    #[instrument(skip(self), fields(tick = self.ticks + 1))]
    async fn tick(&mut self) -> ScrapeReport {
        self.ticks += 1;
        self.state_tx.send_replace(SchedulerState::Scraping);

        let started_at = Utc::now();
        let start = Instant::now();

        let result = self.scraper.scrape().await;
        self.metrics.record(&result);

        let report = ScrapeReport {
            tick: self.ticks,
            started_at,
            elapsed: start.elapsed(),
            failures: result.failures(),
        };

        if report.elapsed > self.period {
            warn!(
                "tick took {:?}, longer than the {:?} interval",
                report.elapsed, self.period
            );
        }

        self.state_tx.send_replace(SchedulerState::Idle);
        report
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Like [`ticker`] but without the immediate first tick
fn ticker_after(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Handle for controlling a ScrapeSchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    /// Spawn the scheduler; the first tick runs immediately
    ///
    /// With `query_timeout` unset, every interval change re-derives the
    /// scraper's per-query budget from the new period.
    pub fn spawn(
        scraper: AsteriskScraper,
        metrics: Arc<AsteriskMetrics>,
        period: Duration,
        query_timeout: Option<Duration>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);

        let actor =
            ScrapeSchedulerActor::new(scraper, metrics, period, query_timeout, cmd_rx, state_tx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            state: state_rx,
        }
    }

    /// Run a tick now and wait for its report
    pub async fn scrape_now(&self) -> Result<ScrapeReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ScrapeNow { respond_to: tx })
            .await
            .context("failed to send ScrapeNow command")?;

        rx.await.context("failed to receive scrape report")
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Resolves once the actor has left its loop
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == SchedulerState::Stopped)
            .await;
    }
}
