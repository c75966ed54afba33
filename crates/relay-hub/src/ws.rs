//! WebSocket event feed.
//!
//! Every connecting client receives each hub event as one JSON text frame:
//!
//! ```json
//! {"kind":"data","id":"…","timestamp":"…","connection_id":"hr","channel":null,
//!  "payload":{"type":"record","value":{"type":"heart_rate","bpm":72}}}
//! ```
//!
//! Clients may also drive connections with text frames:
//!
//! ```json
//! {"cmd":"send","id":"esp32","message":"LED ON"}
//! {"cmd":"disconnect","id":"esp32"}
//! {"cmd":"remove","id":"esp32"}
//! ```
//!
//! Each command is answered with `{"ok":true}` or `{"error":"…"}`. Frames
//! that are not valid commands are ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use relay_types::RelayError;
use serde::Deserialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::RelayHub;
use crate::command::CommandHandler;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum FeedCommand {
    Send { id: String, message: String },
    Disconnect { id: String },
    Remove { id: String },
}

/// Serves the hub over WebSocket.
#[derive(Clone)]
pub struct EventFeed {
    hub: RelayHub,
    handler: Option<Arc<dyn CommandHandler>>,
}

impl EventFeed {
    /// A read-only feed; inbound commands are ignored.
    pub fn new(hub: RelayHub) -> Self {
        Self { hub, handler: None }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind `addr`, surfacing port-in-use to the caller.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Transport(format!("ws bind error on {addr}: {e}")))
    }

    /// Accept clients on `listener` forever.
    pub async fn run(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "ws feed listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let feed = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = feed.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), RelayError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| RelayError::Transport(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut subscriber = self.hub.subscribe();

        loop {
            tokio::select! {
                event = subscriber.recv() => {
                    let Some(event) = event else { break };
                    let json = serde_json::to_string(&event)
                        .map_err(|e| RelayError::Channel(e.to_string()))?;
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(peer = %peer, error = %e, "ws read error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_text(text.as_str()).await {
                                if ws_tx.send(Message::Text(reply.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Run one inbound command; `None` when the frame is not a command or
    /// the feed is read-only.
    async fn handle_text(&self, text: &str) -> Option<String> {
        let handler = self.handler.as_ref()?;
        let command = match serde_json::from_str::<FeedCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "ignoring ws frame");
                return None;
            }
        };

        let result = match &command {
            FeedCommand::Send { id, message } => handler.send(id, message.as_bytes()).await,
            FeedCommand::Disconnect { id } => handler.disconnect(id).await,
            FeedCommand::Remove { id } => handler.remove(id).await,
        };
        let reply = match result {
            Ok(()) => json!({ "ok": true }),
            Err(e) => {
                warn!(command = ?command, error = %e, "ws command failed");
                json!({ "error": e.to_string() })
            }
        };
        Some(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_types::{ConnectParams, Event, Payload};
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio_tungstenite::connect_async;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn connect(&self, id: &str, _params: ConnectParams) -> Result<(), RelayError> {
            self.calls.lock().await.push(format!("connect {id}"));
            Ok(())
        }
        async fn disconnect(&self, id: &str) -> Result<(), RelayError> {
            self.calls.lock().await.push(format!("disconnect {id}"));
            Ok(())
        }
        async fn send(&self, id: &str, bytes: &[u8]) -> Result<(), RelayError> {
            if id == "closed" {
                return Err(RelayError::NotConnected(id.to_string()));
            }
            self.calls
                .lock()
                .await
                .push(format!("send {id} {}", String::from_utf8_lossy(bytes)));
            Ok(())
        }
        async fn remove(&self, id: &str) -> Result<(), RelayError> {
            self.calls.lock().await.push(format!("remove {id}"));
            Ok(())
        }
    }

    #[test]
    fn command_frames_parse() {
        let cmd: FeedCommand = serde_json::from_str(r#"{"cmd":"send","id":"a","message":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            FeedCommand::Send {
                id: "a".into(),
                message: "hi".into()
            }
        );
        assert!(serde_json::from_str::<FeedCommand>(r#"{"cmd":"explode","id":"a"}"#).is_err());
    }

    #[tokio::test]
    async fn commands_reach_handler_and_get_replies() {
        let recorder = Arc::new(Recorder::default());
        let feed = EventFeed::new(RelayHub::default()).with_handler(recorder.clone());

        let ok = feed.handle_text(r#"{"cmd":"remove","id":"esp"}"#).await;
        assert_eq!(ok.as_deref(), Some(r#"{"ok":true}"#));

        let err = feed
            .handle_text(r#"{"cmd":"send","id":"closed","message":"x"}"#)
            .await
            .unwrap();
        assert!(err.contains("not connected"));

        assert_eq!(feed.handle_text("not json").await, None);
        assert_eq!(*recorder.calls.lock().await, vec!["remove esp".to_string()]);
    }

    #[tokio::test]
    async fn read_only_feed_ignores_commands() {
        let feed = EventFeed::new(RelayHub::default());
        assert_eq!(feed.handle_text(r#"{"cmd":"remove","id":"esp"}"#).await, None);
    }

    #[tokio::test]
    async fn client_receives_hub_events_as_json() -> Result<(), Box<dyn std::error::Error>> {
        let hub = RelayHub::default();
        let listener = EventFeed::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let port = listener.local_addr()?.port();
        let server = tokio::spawn(EventFeed::new(hub.clone()).run(listener));

        let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}")).await?;

        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        hub.publish_data(Event::new("hr", Some("bpm".into()), Payload::Scalar(72.0)));

        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or("stream ended")??;
        let Message::Text(text) = frame else {
            return Err("expected a text frame".into());
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str())?;
        assert_eq!(value["kind"], "data");
        assert_eq!(value["connection_id"], "hr");
        assert_eq!(value["payload"]["value"], 72.0);

        server.abort();
        Ok(())
    }
}
