//! AMI session over TCP, backed by the `asterisk-manager` client
//!
//! The client owns the socket, the framing and the login. This adapter maps
//! its types onto the crate's own:
//!
//! ```text
//! Action ──► AmiAction::Custom ──► Manager::send_action ──► AmiResponse ──► Response
//! Manager::all_events_stream ──► AmiEvent ──► Event ──► SubscriptionTable::dispatch
//! ```
//!
//! Command output is normalized on the way in: several `Output` lines (or
//! one multi-line `Output`) become a single `CommandResponse` field joined by
//! newlines, with `Output` keeping the first line. A single-line `Output`
//! stays as is.
//!
//! There is no reconnect: once the client reports the connection lost the
//! state watch flips to `Disconnected` and every later send fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use asterisk_manager::{AmiAction, AmiEvent, AmiResponse, Manager, ManagerOptions};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{info, instrument, trace, warn};

use crate::config::AmiConfig;

use super::subscriptions::SubscriptionTable;
use super::{
    ACTION_ID, Action, AmiError, AmiResult, ConnectionState, Event, EventHandler, Fields,
    Response, SubscriptionId, Transport,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Trailer of `Response: Follows` command output
const END_COMMAND: &str = "--END COMMAND--";

const OUTPUT: &str = "Output";
const COMMAND_RESPONSE: &str = "CommandResponse";

/// Authenticated manager session
pub struct TcpTransport {
    manager: Mutex<Manager>,
    subscriptions: Arc<SubscriptionTable>,
    next_action: AtomicU64,
    prefix: String,
    status_tx: Arc<watch::Sender<ConnectionState>>,

    /// Set by the event task once the session is gone
    closed: Arc<AtomicBool>,
    events: JoinHandle<()>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Connect and log in; any failure here is fatal to the caller
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: &AmiConfig) -> AmiResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let options = ManagerOptions {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.secret.clone(),
            events: true,
        };

        let mut manager = Manager::new();
        tokio::time::timeout(CONNECT_TIMEOUT, manager.connect_and_login(options))
            .await
            .map_err(|_| AmiError::ConnectionFailed(format!("{addr}: login timed out")))?
            .map_err(|e| AmiError::ConnectionFailed(format!("{addr}: {e}")))?;

        let subscriptions = Arc::new(SubscriptionTable::new());
        let (status_tx, _) = watch::channel(ConnectionState::Connected);
        let status_tx = Arc::new(status_tx);
        let closed = Arc::new(AtomicBool::new(false));

        let stream = manager.all_events_stream().await;
        let events = tokio::spawn(drain_events(
            stream,
            subscriptions.clone(),
            status_tx.clone(),
            closed.clone(),
        ));

        info!("logged in to manager interface at {addr}");

        Ok(Self {
            manager: Mutex::new(manager),
            subscriptions,
            next_action: AtomicU64::new(1),
            prefix: format!("exporter-{}", std::process::id()),
            status_tx,
            closed,
            events,
        })
    }

    /// Politely end the session
    pub async fn logoff(&self) -> AmiResult<()> {
        self.send(&Action::new("Logoff")).await.map(|_| ())
    }

    fn next_action_id(&self) -> String {
        let n = self.next_action.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.events.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn subscribe(&self, event: &str, handler: EventHandler) -> AmiResult<SubscriptionId> {
        self.subscriptions.subscribe(event, handler)
    }

    fn unsubscribe(&self, event: &str, id: SubscriptionId) -> AmiResult<()> {
        self.subscriptions.unsubscribe(event, id)
    }

    async fn send(&self, action: &Action) -> AmiResult<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AmiError::Disconnected("manager session is closed".to_string()));
        }

        let id = action
            .get(ACTION_ID)
            .map(str::to_string)
            .unwrap_or_else(|| self.next_action_id());
        let params: HashMap<String, String> = action
            .params
            .iter()
            .filter(|(key, _)| key != ACTION_ID)
            .cloned()
            .collect();

        let request = AmiAction::Custom {
            action: action.name.clone(),
            params,
            action_id: Some(id.clone()),
        };
        trace!("sending {} as {id}", action.name);

        let reply = self
            .manager
            .lock()
            .await
            .send_action(request)
            .await
            .map_err(|e| AmiError::Disconnected(format!("{} not answered: {e}", action.name)))?;

        Ok(into_response(reply, &id))
    }

    fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status_tx.subscribe()
    }
}

async fn drain_events<S, E>(
    stream: S,
    subscriptions: Arc<SubscriptionTable>,
    status_tx: Arc<watch::Sender<ConnectionState>>,
    closed: Arc<AtomicBool>,
) where
    S: tokio_stream::Stream<Item = Result<AmiEvent, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let reason = loop {
        match stream.next().await {
            Some(Ok(AmiEvent::UnknownEvent { event_type, fields })) => {
                subscriptions.dispatch(&into_event(event_type, fields));
            }
            Some(Ok(AmiEvent::InternalConnectionLost { error })) => {
                break format!("connection lost: {error}");
            }
            Some(Ok(other)) => trace!("ignoring {other:?}"),
            Some(Err(e)) => warn!("manager events skipped: {e}"),
            None => break "event stream ended".to_string(),
        }
    };

    warn!("manager session ended: {reason}");
    closed.store(true, Ordering::SeqCst);
    status_tx.send_replace(ConnectionState::Disconnected(reason));
}

/// Header values as the client hands them over
trait FieldText {
    fn into_lines(self) -> Vec<String>;
}

impl FieldText for String {
    fn into_lines(self) -> Vec<String> {
        vec![self]
    }
}

impl FieldText for Value {
    fn into_lines(self) -> Vec<String> {
        match self {
            Value::String(text) => vec![text],
            Value::Array(items) => items.into_iter().flat_map(FieldText::into_lines).collect(),
            Value::Null => Vec::new(),
            other => vec![other.to_string()],
        }
    }
}

fn into_fields<V: FieldText>(raw: HashMap<String, V>) -> Fields {
    let mut fields = Fields::new();
    for (key, value) in raw {
        let lines = value.into_lines();
        if key == OUTPUT {
            normalize_output(lines, &mut fields);
        } else {
            fields.insert(key, lines.join("\n"));
        }
    }
    fields
}

/// Fold command output lines into `Output` and, when multi-line, `CommandResponse`
fn normalize_output(lines: Vec<String>, fields: &mut Fields) {
    let lines: Vec<String> = lines
        .iter()
        .flat_map(|text| text.lines())
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| *line != END_COMMAND)
        .map(str::to_string)
        .collect();

    match lines.as_slice() {
        [] => {}
        [single] => {
            fields.insert(OUTPUT.to_string(), single.clone());
        }
        [first, ..] => {
            fields.insert(OUTPUT.to_string(), first.clone());
            fields.insert(COMMAND_RESPONSE.to_string(), lines.join("\n"));
        }
    }
}

fn into_response(reply: AmiResponse, action_id: &str) -> Response {
    let mut fields = into_fields(reply.fields);
    fields.insert("Response".to_string(), reply.response);
    if let Some(message) = reply.message {
        fields.insert("Message".to_string(), message);
    }
    fields.insert(
        ACTION_ID.to_string(),
        reply.action_id.unwrap_or_else(|| action_id.to_string()),
    );
    Response::new(fields)
}

fn into_event<V: FieldText>(name: String, raw: HashMap<String, V>) -> Event {
    let mut fields = into_fields(raw);
    fields.remove("Event");
    Event { name, fields }
}
