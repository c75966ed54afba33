//! Hub → OSC forwarding and the inbound `/send` listener.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_types::{HubEvent, Payload, RelayError};
use rosc::{OscMessage, OscPacket, OscType, decoder};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::flatten::flatten;
use super::sender::OscSender;
use super::{OscMode, OscSettings};
use crate::bus::{HubSubscriber, RelayHub};
use crate::command::CommandHandler;

/// Inbound address carrying `[connection_id, message]`.
pub const SEND_ADDRESS: &str = "/send";

const RECV_BUFFER_LEN: usize = 8192;

#[derive(Clone, Debug)]
pub struct OscBridge {
    hub: RelayHub,
    settings: OscSettings,
}

impl OscBridge {
    pub fn new(hub: RelayHub, settings: OscSettings) -> Self {
        Self { hub, settings }
    }

    pub fn settings(&self) -> &OscSettings {
        &self.settings
    }

    /// Encode one hub event according to the configured mode.
    pub fn encode(&self, event: &HubEvent) -> Vec<OscMessage> {
        let base = self.settings.base_address.trim_end_matches('/');
        match event {
            HubEvent::Status(status) => vec![OscMessage {
                addr: format!("{base}/status"),
                args: vec![
                    OscType::String(status.connection_id.clone()),
                    OscType::String(status.state.to_string()),
                ],
            }],
            HubEvent::Data(data) => match self.settings.mode {
                OscMode::Standard => vec![OscMessage {
                    addr: base.to_string(),
                    args: vec![
                        OscType::String(data.connection_id.clone()),
                        standard_arg(&data.payload),
                    ],
                }],
                OscMode::Flattened => flatten(base, &data.connection_id, &data.payload),
            },
        }
    }

    /// Resolve the configured target and bind a sending socket.
    pub async fn sender(&self) -> Result<OscSender, RelayError> {
        OscSender::bind(&self.settings.target_host, self.settings.target_port).await
    }

    /// Subscribe to the hub now and forward every event from a background
    /// task until the hub closes. Send failures are logged and skipped.
    pub fn spawn_outbound(&self, sender: OscSender) -> JoinHandle<()> {
        let subscriber = self.hub.subscribe();
        let bridge = self.clone();
        info!(target_addr = %sender.target(), mode = ?self.settings.mode, "osc outbound started");
        tokio::spawn(async move { bridge.forward(subscriber, sender).await })
    }

    async fn forward(self, mut subscriber: HubSubscriber, sender: OscSender) {
        while let Some(event) = subscriber.recv().await {
            for message in self.encode(&event) {
                let addr = message.addr.clone();
                if let Err(e) = sender.send(message).await {
                    warn!(addr = %addr, error = %e, "osc send failed");
                }
            }
        }
        debug!("osc outbound stopped: hub closed");
    }

    /// Bind the inbound UDP port.
    ///
    /// # Errors
    ///
    /// [`RelayError::Osc`] when the port is already in use.
    pub async fn listen(&self) -> Result<OscListener, RelayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.settings.listen_port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| RelayError::Osc(format!("osc listen on {addr}: {e}")))?;
        info!(addr = %addr, "osc listener bound");
        Ok(OscListener { socket })
    }
}

/// Structured payloads travel as compact JSON in standard mode.
fn standard_arg(payload: &Payload) -> OscType {
    match payload {
        Payload::Scalar(v) => OscType::Float(*v as f32),
        other => OscType::String(other.to_compact_string()),
    }
}

/// Bound inbound socket; see [`OscBridge::listen`].
#[derive(Debug)]
pub struct OscListener {
    socket: UdpSocket,
}

impl OscListener {
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.socket
            .local_addr()
            .map_err(|e| RelayError::Osc(e.to_string()))
    }

    /// Receive packets forever, dispatching `/send` messages to `handler`.
    pub async fn run(self, handler: Arc<dyn CommandHandler>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "osc recv error");
                    continue;
                }
            };
            let packet = match decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => packet,
                Err(e) => {
                    warn!(peer = %peer, error = ?e, "undecodable osc packet dropped");
                    continue;
                }
            };
            let mut messages = Vec::new();
            unpack(packet, &mut messages);
            for message in &messages {
                dispatch(handler.as_ref(), message).await;
            }
        }
    }
}

fn unpack(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(m) => out.push(m),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                unpack(inner, out);
            }
        }
    }
}

/// `(connection_id, message)` of a well-formed `/send`.
pub fn parse_send(message: &OscMessage) -> Option<(String, String)> {
    if message.addr != SEND_ADDRESS {
        return None;
    }
    match message.args.as_slice() {
        [OscType::String(id), body] => {
            let body = match body {
                OscType::String(s) => s.clone(),
                OscType::Int(i) => i.to_string(),
                OscType::Long(l) => l.to_string(),
                OscType::Float(f) => f.to_string(),
                OscType::Double(d) => d.to_string(),
                OscType::Blob(b) => String::from_utf8_lossy(b).into_owned(),
                _ => return None,
            };
            Some((id.clone(), body))
        }
        _ => None,
    }
}

/// Forward one inbound message. Nothing here is fatal to the listener.
async fn dispatch(handler: &dyn CommandHandler, message: &OscMessage) {
    let Some((id, body)) = parse_send(message) else {
        warn!(addr = %message.addr, args = message.args.len(), "unhandled osc message dropped");
        return;
    };
    match handler.send(&id, body.as_bytes()).await {
        Ok(()) => debug!(connection_id = %id, len = body.len(), "osc /send forwarded"),
        Err(e) => warn!(connection_id = %id, error = %e, "osc /send dropped"),
    }
}
