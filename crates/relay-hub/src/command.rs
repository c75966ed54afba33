//! [`CommandHandler`] – the command API the bridges drive.
//!
//! The OSC listener and the WebSocket feed only know this trait; the
//! connection manager implements it.

use async_trait::async_trait;
use relay_types::{ConnectParams, RelayError};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Open (or re-open) connection `id`.
    async fn connect(&self, id: &str, params: ConnectParams) -> Result<(), RelayError>;

    /// Close connection `id` without triggering a reconnect.
    async fn disconnect(&self, id: &str) -> Result<(), RelayError>;

    /// Write raw bytes to connection `id`.
    async fn send(&self, id: &str, bytes: &[u8]) -> Result<(), RelayError>;

    /// Disconnect `id` and forget it.
    async fn remove(&self, id: &str) -> Result<(), RelayError>;
}
