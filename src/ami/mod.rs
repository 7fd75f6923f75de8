//! Asterisk Manager Interface (AMI) vocabulary and transports
//!
//! The manager interface is an asynchronous, line-framed protocol: a client
//! sends a named `Action` and the switch answers with an immediate response
//! plus zero or more named events streamed over the same connection. There is
//! no request/response framing for the streamed part, which is why queries go
//! through the [`correlator`].
//!
//! ## Transports
//!
//! - **TcpTransport**: a real AMI session over TCP (login, framing, routing)
//! - **MemoryTransport**: scripted in-process switch for tests and demos
//!
//! Both share the same [`SubscriptionTable`](subscriptions::SubscriptionTable)
//! for event fan-out.

pub mod correlator;
pub mod error;
pub mod memory;
pub mod subscriptions;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

pub use correlator::{Correlator, FlightPolicy, QuerySpec};
pub use error::{AmiError, AmiResult};
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Header carrying the correlation token of a request
pub const ACTION_ID: &str = "ActionID";

/// Key/value fields of a manager message
pub type Fields = HashMap<String, String>;

/// Callback invoked by a transport for every event of a subscribed type
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque token identifying a single subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// A request sent to the manager interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Action name (e.g. "SIPPeers", "Command")
    pub name: String,

    /// Additional headers, sent in insertion order
    pub params: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Immediate acknowledgement of an action
///
/// Always carries the `ActionID` the transport assigned to the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub fields: Fields,
}

impl Response {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID)
    }

    /// `true` unless the switch answered with `Response: Error`
    pub fn is_success(&self) -> bool {
        !self
            .get("Response")
            .is_some_and(|r| r.eq_ignore_ascii_case("error"))
    }
}

/// An asynchronously delivered, named record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Event type name (the `Event:` header)
    pub name: String,

    pub fields: Fields,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Correlation token, if the switch attached one
    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID)
    }
}

/// Session state published by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected(String),
}

/// The manager-interface session a correlator talks to
///
/// Subscriptions are plain table mutations and therefore synchronous, which
/// lets callers release them from `Drop`. Sending is asynchronous because it
/// waits for the switch's acknowledgement.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register `handler` for every event named `event`
    fn subscribe(&self, event: &str, handler: EventHandler) -> AmiResult<SubscriptionId>;

    /// Remove a subscription previously returned by [`Transport::subscribe`]
    fn unsubscribe(&self, event: &str, id: SubscriptionId) -> AmiResult<()>;

    /// Send an action and wait for its immediate acknowledgement
    async fn send(&self, action: &Action) -> AmiResult<Response>;

    /// Watch the connection state (connect / error notifications)
    fn status(&self) -> watch::Receiver<ConnectionState>;
}
