//! Response correlator - turns the AMI event stream into synchronous queries
//!
//! A query sends one or more actions, collects every streamed record of the
//! requested event types and resolves once each action has produced its
//! terminal event.
//!
//! ## Message Flow
//!
//! ```text
//! query() → acquire single-flight → subscribe handlers → send actions
//!               ↓                                            ↓
//!          release on exit ← unsubscribe ← barrier complete ← [records, terminals] (transport task)
//! ```
//!
//! ## Invariants
//!
//! 1. **Single flight**: at most one query holds the correlator; event types
//!    are server-global, so two concurrent queries would steal each other's
//!    events
//! 2. **Scoped subscriptions**: handlers are removed on every exit path
//!    (success, timeout, transport error) by [`SubscriptionGuard`]
//! 3. **Counting barrier**: a query resolves only after one terminal event
//!    per action, in any order
//! 4. **Bounded wait**: every query runs under a timeout

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, instrument, trace, warn};

use crate::error::{QueryError, QueryResult};

use super::{Action, AmiError, Event, EventHandler, Response, SubscriptionId, Transport};

/// What to do when a query arrives while another one is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightPolicy {
    /// Wait for the running query, bounded by the caller's timeout
    Queue,

    /// Fail immediately with [`QueryError::Busy`]
    #[default]
    Reject,
}

/// Description of one logical query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    /// Name used in logs and errors
    pub name: String,

    /// Actions to send, each of which must produce one terminal event
    pub actions: Vec<Action>,

    /// Event types whose records are accumulated
    pub stream: Vec<String>,

    /// Event types that signal the end of an action's stream
    pub terminal: Vec<String>,
}

impl QuerySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            stream: Vec::new(),
            terminal: Vec::new(),
        }
    }

    /// One action, its record type and its terminal type
    pub fn single(action: Action, stream: &str, terminal: &str) -> Self {
        Self::new(action.name.clone())
            .action(action)
            .stream(stream)
            .terminal(terminal)
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn stream(mut self, event: impl Into<String>) -> Self {
        self.stream.push(event.into());
        self
    }

    pub fn terminal(mut self, event: impl Into<String>) -> Self {
        self.terminal.push(event.into());
        self
    }
}

/// Signal forwarded from a transport handler to the waiting query
#[derive(Debug)]
enum Signal {
    Record(Event),
    Terminal(Event),
}

/// Counting barrier over the terminal events of one query
///
/// Terminal events carrying one of the query's ActionIDs retire that action;
/// terminal events without an ActionID retire any outstanding action;
/// terminal events for foreign ActionIDs are leftovers of an earlier request
/// and are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Barrier {
    Pending {
        outstanding: HashSet<String>,
        anonymous: usize,
    },
    Complete,
}

impl Barrier {
    pub(crate) fn new(action_ids: impl IntoIterator<Item = String>) -> Self {
        let outstanding: HashSet<String> = action_ids.into_iter().collect();
        if outstanding.is_empty() {
            Barrier::Complete
        } else {
            Barrier::Pending {
                outstanding,
                anonymous: 0,
            }
        }
    }

    /// Record a terminal signal, returns `true` once the barrier is complete
    pub(crate) fn observe(&mut self, action_id: Option<&str>) -> bool {
        if let Barrier::Pending {
            outstanding,
            anonymous,
        } = self
        {
            match action_id {
                Some(id) => {
                    if !outstanding.remove(id) {
                        trace!("ignoring terminal event for foreign or finished action {id}");
                    }
                }
                None => *anonymous += 1,
            }

            if *anonymous >= outstanding.len() {
                *self = Barrier::Complete;
            }
        }

        self.is_complete()
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(self, Barrier::Complete)
    }
}

/// Subscriptions owned by one query, released on drop
struct SubscriptionGuard<'a> {
    transport: &'a dyn Transport,
    entries: Vec<(String, SubscriptionId)>,
}

impl<'a> SubscriptionGuard<'a> {
    fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, event: &str, handler: EventHandler) -> Result<(), AmiError> {
        let id = self.transport.subscribe(event, handler)?;
        self.entries.push((event.to_string(), id));
        Ok(())
    }
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        for (event, id) in self.entries.drain(..) {
            if let Err(e) = self.transport.unsubscribe(&event, id) {
                warn!("failed to release subscription for {event}: {e}");
            }
        }
    }
}

/// Serializes queries against one transport
pub struct Correlator {
    transport: Arc<dyn Transport>,
    flight: Mutex<()>,
    policy: FlightPolicy,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, policy: FlightPolicy) -> Self {
        Self {
            transport,
            flight: Mutex::new(()),
            policy,
        }
    }

    /// Run a streamed query and return its records in arrival order
    ///
    /// Fails with `Transport` when an action cannot be sent, `Timeout` when
    /// the terminal events do not all arrive in time (partial records are
    /// discarded) and `Busy` when the single-flight slot is unavailable.
    #[instrument(skip(self, spec), fields(query = %spec.name))]
    pub async fn query(&self, spec: &QuerySpec, timeout: Duration) -> QueryResult<Vec<Event>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let _flight = self.acquire(&spec.name, deadline).await?;
        let started = Instant::now();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscriptions = SubscriptionGuard::new(self.transport.as_ref());

        for event in &spec.stream {
            let tx = tx.clone();
            subscriptions.add(
                event,
                Arc::new(move |record: &Event| {
                    if tx.send(Signal::Record(record.clone())).is_err() {
                        trace!("dropping late {} record", record.name);
                    }
                }),
            )?;
        }

        for event in &spec.terminal {
            let tx = tx.clone();
            subscriptions.add(
                event,
                Arc::new(move |terminal: &Event| {
                    if tx.send(Signal::Terminal(terminal.clone())).is_err() {
                        trace!("dropping late {} terminal", terminal.name);
                    }
                }),
            )?;
        }
        drop(tx);

        let mut records = Vec::new();
        let outcome =
            tokio::time::timeout_at(deadline, self.collect(spec, &mut rx, &mut records)).await;

        drop(subscriptions);

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    "query complete with {} records in {:?}",
                    records.len(),
                    started.elapsed()
                );
                Ok(records)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!("query timed out, discarding {} partial records", records.len());
                Err(QueryError::Timeout {
                    query: spec.name.clone(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a single action whose answer is the acknowledgement itself
    #[instrument(skip(self, action), fields(action = %action.name))]
    pub async fn command(&self, action: &Action, timeout: Duration) -> QueryResult<Response> {
        let deadline = tokio::time::Instant::now() + timeout;
        let _flight = self.acquire(&action.name, deadline).await?;

        match tokio::time::timeout_at(deadline, self.send(action)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout {
                query: action.name.clone(),
                after: timeout,
            }),
        }
    }

    /// Take the single-flight slot; a queued wait counts against `deadline`
    async fn acquire(
        &self,
        name: &str,
        deadline: tokio::time::Instant,
    ) -> QueryResult<MutexGuard<'_, ()>> {
        match self.policy {
            FlightPolicy::Reject => self.flight.try_lock().map_err(|_| {
                QueryError::Busy(format!("{name} rejected, another query is in flight"))
            }),
            FlightPolicy::Queue => tokio::time::timeout_at(deadline, self.flight.lock())
                .await
                .map_err(|_| {
                    QueryError::Busy(format!("{name} timed out waiting for the correlator"))
                }),
        }
    }

    async fn send(&self, action: &Action) -> QueryResult<Response> {
        let response = self.transport.send(action).await?;
        if !response.is_success() {
            let message = response.get("Message").unwrap_or("no message");
            return Err(AmiError::ActionFailed(format!("{}: {message}", action.name)).into());
        }
        Ok(response)
    }

    async fn collect(
        &self,
        spec: &QuerySpec,
        rx: &mut mpsc::UnboundedReceiver<Signal>,
        records: &mut Vec<Event>,
    ) -> QueryResult<()> {
        let mut action_ids = Vec::with_capacity(spec.actions.len());
        for action in &spec.actions {
            let response = self.send(action).await?;
            let id = response.action_id().map(str::to_string).ok_or_else(|| {
                QueryError::Transport(format!("{} acknowledged without ActionID", action.name))
            })?;
            trace!("{} acknowledged as {id}", action.name);
            action_ids.push(id);
        }

        let ours: HashSet<String> = action_ids.iter().cloned().collect();
        let mut barrier = Barrier::new(action_ids);

        while !barrier.is_complete() {
            let Some(signal) = rx.recv().await else {
                return Err(QueryError::Transport(
                    "event stream closed before completion".to_string(),
                ));
            };

            match signal {
                Signal::Record(record) => {
                    if record.action_id().is_none_or(|id| ours.contains(id)) {
                        records.push(record);
                    } else {
                        trace!("dropping {} record of a foreign action", record.name);
                    }
                }
                Signal::Terminal(terminal) => {
                    barrier.observe(terminal.action_id());
                }
            }
        }

        Ok(())
    }
}
