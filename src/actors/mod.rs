//! Actor driving the periodic scrape
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → AsteriskScraper::scrape → AsteriskMetrics::record → ScrapeReport
//!     ↑
//!     └─── Commands (ScrapeNow, UpdateInterval, Shutdown)
//! ```
//!
//! The actor runs as a single tokio task, so ticks are serialized by
//! construction: a tick that overruns the interval delays the next one,
//! and missed ticks are skipped rather than bunched.

pub mod messages;
pub mod scheduler;

pub use messages::{SchedulerCommand, SchedulerState, ScrapeReport};
pub use scheduler::{ScrapeSchedulerActor, SchedulerHandle};
