//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asterisk_exporter::{
    ami::{
        Correlator, Event, FlightPolicy, MemoryTransport, Transport,
        memory::Reply,
    },
    metrics::{AsteriskMetrics, HostLabels},
    scraper::AsteriskScraper,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Notify;

pub const SECRET: &str = "s3cret";

pub fn test_host() -> HostLabels {
    HostLabels {
        hostname: "pbx-test".to_string(),
        host_ips: "10.0.0.2".to_string(),
    }
}

pub fn create_test_metrics() -> Arc<AsteriskMetrics> {
    Arc::new(AsteriskMetrics::new(test_host()).unwrap())
}

pub fn create_test_scraper(transport: Arc<dyn Transport>) -> AsteriskScraper {
    let correlator = Arc::new(Correlator::new(transport, FlightPolicy::Reject));
    AsteriskScraper::new(correlator, Duration::from_millis(500))
}

/// `name{hostname="pbx-test",host_ips="10.0.0.2"} value` as the encoder renders it
pub fn host_sample(name: &str, value: f64) -> String {
    format!(r#"{name}{{host_ips="10.0.0.2",hostname="pbx-test"}} {value}"#)
}

pub fn peer_entry(name: &str, dynamic: &str, status: &str) -> Event {
    Event::new("PeerEntry")
        .with("Channeltype", "SIP")
        .with("ObjectName", name)
        .with("Dynamic", dynamic)
        .with("IPaddress", "10.0.0.50")
        .with("Status", status)
}

pub fn registry_entry(host: &str, state: &str) -> Event {
    Event::new("RegistryEntry")
        .with("Host", host)
        .with("Username", "trunkuser")
        .with("State", state)
}

pub fn channel(name: &str, application: &str, data: &str) -> Event {
    Event::new("CoreShowChannel")
        .with("Channel", name)
        .with("Application", application)
        .with("ApplicationData", data)
}

/// The switch every test scrapes:
/// - 1 active / 42 processed calls
/// - extensions 1001 (OK) and 1002 (UNREACHABLE), trunk SIP/provider1
/// - one registered and one rejected registry
/// - one inbound and one outbound call on the trunk
pub fn pbx_events(action: &str) -> Vec<Event> {
    match action {
        "SIPPeers" => vec![
            peer_entry("1001", "yes", "OK (12 ms)"),
            peer_entry("1002", "yes", "UNREACHABLE"),
            peer_entry("provider1", "no", "OK (30 ms)"),
            Event::new("PeerlistComplete"),
        ],
        "IAXpeerlist" => vec![Event::new("PeerlistComplete")],
        "SIPshowregistry" => vec![
            registry_entry("sip.provider1.example", "Registered"),
            registry_entry("sip.provider2.example", "Rejected"),
            Event::new("RegistrationsComplete"),
        ],
        "CoreShowChannels" => vec![
            channel("SIP/1001-00000001", "Dial", "SIP/provider1/5551234,60"),
            channel("SIP/provider1-00000002", "AppDial", "(Outgoing Line)"),
            channel("SIP/provider1-00000003", "Queue", "support"),
            Event::new("CoreShowChannelsComplete"),
        ],
        _ => Vec::new(),
    }
}

pub const CALL_SUMMARY: &str = "Channel              Location             State   Application(Data)\n\
                                2 active channels\n\
                                1 active call\n\
                                42 calls processed";

/// What older switches answer to `core show channels count`
pub const LEGACY_CALL_SUMMARY: &str = "5 active channels";

pub fn memory_pbx() -> Arc<MemoryTransport> {
    let transport = Arc::new(MemoryTransport::new());
    transport.script("Command", Reply::new().field("CommandResponse", CALL_SUMMARY));
    for action in ["SIPPeers", "IAXpeerlist", "SIPshowregistry", "CoreShowChannels"] {
        let reply = pbx_events(action)
            .into_iter()
            .fold(Reply::new(), |reply, event| reply.event(event));
        transport.script(action, reply);
    }
    transport
}

/// Encode a manager message with CRLF framing
pub fn message(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(&format!("{key}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out
}

fn event_message(event: &Event, action_id: &str) -> String {
    let mut out = format!("Event: {}\r\nActionID: {action_id}\r\n", event.name);
    for (key, value) in &event.fields {
        out.push_str(&format!("{key}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out
}

/// Answer one action the way a real switch does
pub fn pbx_reply(fields: &HashMap<String, String>) -> Vec<String> {
    let id = fields.get("ActionID").map(String::as_str).unwrap_or_default();
    let action = fields.get("Action").map(String::as_str).unwrap_or_default();

    match action {
        "Login" if fields.get("Secret").map(String::as_str) == Some(SECRET) => vec![message(&[
            ("Response", "Success"),
            ("ActionID", id),
            ("Message", "Authentication accepted"),
        ])],
        "Login" => vec![message(&[
            ("Response", "Error"),
            ("ActionID", id),
            ("Message", "Authentication failed"),
        ])],
        "Logoff" => vec![message(&[
            ("Response", "Goodbye"),
            ("ActionID", id),
            ("Message", "Thanks for all the fish."),
        ])],
        "Command" => vec![message(&[
            ("Response", "Success"),
            ("ActionID", id),
            ("Message", "Command output follows"),
            ("Output", LEGACY_CALL_SUMMARY),
        ])],
        "SIPPeers" | "IAXpeerlist" | "SIPshowregistry" | "CoreShowChannels" => {
            let mut out = vec![message(&[
                ("Response", "Success"),
                ("ActionID", id),
                ("EventList", "start"),
            ])];
            out.extend(pbx_events(action).iter().map(|e| event_message(e, id)));
            out
        }
        _ => vec![message(&[
            ("Response", "Error"),
            ("ActionID", id),
            ("Message", "Invalid/unknown command"),
        ])],
    }
}

/// Single-connection manager server on a random local port
///
/// Speaks just enough of the wire format for the client's login, list and
/// command actions.
pub struct FakeAmi {
    pub addr: SocketAddr,
    actions: Arc<Mutex<Vec<String>>>,
    close: Arc<Notify>,
}

impl FakeAmi {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let actions = Arc::new(Mutex::new(Vec::new()));
        let close = Arc::new(Notify::new());

        let log = actions.clone();
        let closing = close.clone();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            if write_half
                .write_all(b"Asterisk Call Manager/5.0.1\r\n")
                .await
                .is_err()
            {
                return;
            }

            loop {
                let fields = tokio::select! {
                    fields = read_message(&mut reader) => fields,
                    _ = closing.notified() => break,
                };
                let Some(fields) = fields else { break };

                if let Some(action) = fields.get("Action") {
                    log.lock().unwrap().push(action.clone());
                }
                for chunk in pbx_reply(&fields) {
                    if write_half.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            addr,
            actions,
            close,
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    /// Drop the connection from the server side
    pub fn hang_up(&self) {
        self.close.notify_one();
    }
}

async fn read_message(reader: &mut BufReader<OwnedReadHalf>) -> Option<HashMap<String, String>> {
    let mut fields = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            if fields.is_empty() {
                continue;
            }
            return Some(fields);
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.to_string(), value.trim().to_string());
        }
    }
}
