//! Per-trunk call direction from `CoreShowChannel` records

use std::collections::{BTreeMap, BTreeSet};

use crate::ami::Event;

use super::peers::TrunkIdentity;

/// Channel record event type
pub const CORE_SHOW_CHANNEL: &str = "CoreShowChannel";

/// Terminal event of `CoreShowChannels`
pub const CORE_SHOW_CHANNELS_COMPLETE: &str = "CoreShowChannelsComplete";

/// `ApplicationData` of a trunk's own outbound leg
pub const OUTGOING_LINE: &str = "(Outgoing Line)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionCounts {
    pub inbound: u64,
    pub outbound: u64,
}

/// Point-in-time call counts for every known trunk
pub type TrunkCalls = BTreeMap<TrunkIdentity, DirectionCounts>;

/// Attribute each channel to at most one trunk
///
/// Every trunk in `trunks` appears in the result, idle ones with zero counts.
pub fn classify_channels(records: &[Event], trunks: &BTreeSet<TrunkIdentity>) -> TrunkCalls {
    let mut calls: TrunkCalls = trunks
        .iter()
        .map(|trunk| (trunk.clone(), DirectionCounts::default()))
        .collect();

    for record in records.iter().filter(|r| r.name == CORE_SHOW_CHANNEL) {
        let application_data = record.get("ApplicationData").unwrap_or_default();
        if application_data == OUTGOING_LINE {
            continue;
        }
        let channel = record.get("Channel").unwrap_or_default();

        for (trunk, counts) in calls.iter_mut() {
            if application_data.contains(trunk.as_str()) {
                counts.outbound += 1;
                break;
            }
            if channel.contains(trunk.as_str()) {
                counts.inbound += 1;
                break;
            }
        }
    }

    calls
}
