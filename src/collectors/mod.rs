//! Classification of streamed AMI records into metric values
//!
//! Everything in here is pure: records in, counts out. The scraper owns the
//! queries that produce the records.
//!
//! - **calls**: call counters from free-text command output
//! - **peers**: extension availability and trunk identities
//! - **channels**: per-trunk inbound/outbound call counts
//! - **registries**: outbound registration state

pub mod calls;
pub mod channels;
pub mod peers;
pub mod registries;

pub use calls::{CallSummary, parse_call_summary, parse_call_summary_text};
pub use channels::{DirectionCounts, TrunkCalls, classify_channels};
pub use peers::{ExtensionSummary, PeerEntry, TrunkIdentity, classify_peers};
pub use registries::{RegistrySummary, classify_registries};
