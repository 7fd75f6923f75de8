//! Event subscription table shared by all transports

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use super::{AmiError, AmiResult, Event, EventHandler, SubscriptionId};

/// Maps event type names to the handlers registered for them
///
/// Handlers are cloned out of the lock before they run, so a handler may
/// itself subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct SubscriptionTable {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event: &str, handler: EventHandler) -> AmiResult<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.lock()?;
        handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));

        trace!("subscribed {id:?} to {event}");
        Ok(id)
    }

    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> AmiResult<()> {
        let mut handlers = self.lock()?;
        let Some(entries) = handlers.get_mut(event) else {
            return Err(AmiError::UnknownSubscription(format!("{event} ({id:?})")));
        };

        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        if entries.len() == before {
            return Err(AmiError::UnknownSubscription(format!("{event} ({id:?})")));
        }
        if entries.is_empty() {
            handlers.remove(event);
        }

        trace!("unsubscribed {id:?} from {event}");
        Ok(())
    }

    /// Deliver `event` to every handler subscribed to its name
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        let targets: Vec<EventHandler> = match self.handlers.lock() {
            Ok(handlers) => handlers
                .get(&event.name)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        for handler in &targets {
            handler(event);
        }

        targets.len()
    }

    /// Total number of live subscriptions across all event types
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .map(|handlers| handlers.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> AmiResult<std::sync::MutexGuard<'_, HashMap<String, Vec<(SubscriptionId, EventHandler)>>>>
    {
        self.handlers
            .lock()
            .map_err(|_| AmiError::Protocol("subscription table poisoned".to_string()))
    }
}
