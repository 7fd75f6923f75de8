//! In-process transport with scripted replies
//!
//! `MemoryTransport` behaves like a switch that answers each action with a
//! scripted [`Reply`]: an acknowledgement plus a list of events that are
//! delivered from a separate tokio task, exactly like a real session delivers
//! them from its reader task. It is useful for:
//! - Testing the correlator and scrapers without an Asterisk box
//! - Reproducing races (delayed or reordered terminal events)
//! - Injecting stray events at arbitrary times
//!
//! ## Limitations
//!
//! - **One script per action name**: the last script registered wins
//! - **No wire framing**: messages never leave the process

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::trace;

use super::subscriptions::SubscriptionTable;
use super::{
    ACTION_ID, Action, AmiError, AmiResult, ConnectionState, Event, EventHandler, Fields,
    Response, SubscriptionId, Transport,
};

/// Scripted answer to one action
#[derive(Debug, Clone, Default)]
pub struct Reply {
    response: Fields,
    events: Vec<ScriptedEvent>,
    delay: Option<Duration>,
    failure: Option<String>,
}

#[derive(Debug, Clone)]
struct ScriptedEvent {
    event: Event,
    /// Stamp the request's ActionID onto the event before delivery
    correlated: bool,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to the immediate acknowledgement
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.insert(key.into(), value.into());
        self
    }

    /// Stream an event carrying the request's ActionID
    pub fn event(mut self, event: Event) -> Self {
        self.events.push(ScriptedEvent {
            event,
            correlated: true,
        });
        self
    }

    /// Stream an event without any correlation token
    pub fn uncorrelated(mut self, event: Event) -> Self {
        self.events.push(ScriptedEvent {
            event,
            correlated: false,
        });
        self
    }

    /// Wait before streaming the events
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the send itself, no events are streamed
    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

/// Scriptable transport living entirely in memory
pub struct MemoryTransport {
    subscriptions: Arc<SubscriptionTable>,
    scripts: Mutex<HashMap<String, Reply>>,
    sent: Mutex<Vec<Action>>,
    next_action: AtomicU64,
    disconnected: AtomicBool,
    status_tx: watch::Sender<ConnectionState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            subscriptions: Arc::new(SubscriptionTable::new()),
            scripts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            next_action: AtomicU64::new(1),
            disconnected: AtomicBool::new(false),
            status_tx,
        }
    }

    /// Register the reply for every future action named `action`
    pub fn script(&self, action: &str, reply: Reply) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(action.to_string(), reply);
        }
    }

    /// Deliver an event right now, outside of any action
    pub fn emit(&self, event: &Event) -> usize {
        self.subscriptions.dispatch(event)
    }

    /// Drop the session: every later send fails
    pub fn disconnect(&self, reason: &str) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.status_tx
            .send_replace(ConnectionState::Disconnected(reason.to_string()));
    }

    /// Actions sent so far, in order
    pub fn sent_actions(&self) -> Vec<Action> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn subscribe(&self, event: &str, handler: EventHandler) -> AmiResult<SubscriptionId> {
        self.subscriptions.subscribe(event, handler)
    }

    fn unsubscribe(&self, event: &str, id: SubscriptionId) -> AmiResult<()> {
        self.subscriptions.unsubscribe(event, id)
    }

    async fn send(&self, action: &Action) -> AmiResult<Response> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(AmiError::Disconnected("memory transport closed".to_string()));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(action.clone());
        }

        let action_id = action.get(ACTION_ID).map(str::to_string).unwrap_or_else(|| {
            format!("mem-{}", self.next_action.fetch_add(1, Ordering::Relaxed))
        });

        let reply = self
            .scripts
            .lock()
            .ok()
            .and_then(|scripts| scripts.get(&action.name).cloned())
            .unwrap_or_default();

        if let Some(reason) = reply.failure {
            return Err(AmiError::Disconnected(reason));
        }

        let mut fields = reply.response;
        fields
            .entry("Response".to_string())
            .or_insert_with(|| "Success".to_string());
        fields.insert(ACTION_ID.to_string(), action_id.clone());

        if !reply.events.is_empty() {
            let table = self.subscriptions.clone();
            let events = reply.events;
            let delay = reply.delay;
            tokio::spawn(async move {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => tokio::task::yield_now().await,
                }
                for scripted in events {
                    let event = if scripted.correlated {
                        scripted.event.with(ACTION_ID, action_id.clone())
                    } else {
                        scripted.event
                    };
                    let delivered = table.dispatch(&event);
                    trace!("delivered {} to {delivered} handlers", event.name);
                }
            });
        }

        Ok(Response::new(fields))
    }

    fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status_tx.subscribe()
    }
}
