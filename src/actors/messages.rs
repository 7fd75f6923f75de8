//! Message types for the scrape scheduler
//!
//! Commands go to the scheduler over an mpsc channel; one-off answers come
//! back over oneshot channels. The scheduler's lifecycle is published on a
//! watch channel as [`SchedulerState`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::QueryError;

/// Commands that can be sent to the ScrapeSchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a tick right away, outside the interval timer
    ///
    /// Ticks never overlap: a tick requested while another one is running
    /// starts after it finished.
    ScrapeNow {
        /// Channel to send the tick report back
        respond_to: oneshot::Sender<ScrapeReport>,
    },

    /// Change the scrape interval
    ///
    /// The ticker is restarted with the new period.
    UpdateInterval {
        /// New interval in seconds
        interval_secs: u64,
    },

    /// Stop ticking. An in-flight tick completes first.
    Shutdown,
}

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick
    Idle,

    /// A tick is running
    Scraping,

    Stopped,
}

/// Summary of one finished tick
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    /// Tick counter, starting at 1
    pub tick: u64,

    pub started_at: DateTime<Utc>,

    pub elapsed: Duration,

    /// Families that were exported as unknown, with their errors
    pub failures: Vec<(&'static str, QueryError)>,
}

impl ScrapeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
