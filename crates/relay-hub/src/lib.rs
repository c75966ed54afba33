//! `relay-hub` – fan-out of decoded events to every downstream consumer.
//!
//! # Modules
//!
//! - [`bus`] – the [`RelayHub`] broadcast point. Every data event and status
//!   transition produced by the connection manager passes through it, in
//!   production order.
//! - [`command`] – the [`CommandHandler`] seam through which external callers
//!   (OSC, WebSocket, CLI) drive connections.
//! - [`osc`] – the OSC bridge: outbound standard / flattened encoding and the
//!   inbound `/send` listener.
//! - [`ws`] – a WebSocket feed streaming hub events as JSON.

pub mod bus;
pub mod command;
pub mod osc;
pub mod ws;

pub use bus::{HubSubscriber, RelayHub};
pub use command::CommandHandler;
pub use osc::{OscBridge, OscMode, OscSettings};
pub use ws::EventFeed;
