//! Outbound registration state from `RegistryEntry` records

use crate::ami::Event;

/// Registry record event type
pub const REGISTRY_ENTRY: &str = "RegistryEntry";

/// Terminal event of `SIPshowregistry`
pub const REGISTRATIONS_COMPLETE: &str = "RegistrationsComplete";

const REGISTERED: &str = "Registered";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub host: String,
    pub username: String,
    pub state: String,
}

impl RegistryEntry {
    pub fn from_event(event: &Event) -> Self {
        Self {
            host: event.get("Host").unwrap_or_default().to_string(),
            username: event.get("Username").unwrap_or_default().to_string(),
            state: event.get("State").unwrap_or_default().to_string(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state == REGISTERED
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub registered: u64,
    pub unregistered: u64,
}

impl RegistrySummary {
    pub fn total(&self) -> u64 {
        self.registered + self.unregistered
    }
}

pub fn classify_registries(records: &[Event]) -> RegistrySummary {
    records
        .iter()
        .filter(|r| r.name == REGISTRY_ENTRY)
        .map(RegistryEntry::from_event)
        .fold(RegistrySummary::default(), |mut summary, entry| {
            if entry.is_registered() {
                summary.registered += 1;
            } else {
                summary.unregistered += 1;
            }
            summary
        })
}
