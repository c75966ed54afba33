//! Transport driver interface.
//!
//! The manager never touches an OS serial port or a Bluetooth adapter
//! directly. It drives these traits, which a platform crate (or
//! [`sim`](crate::sim)) implements.

use std::sync::Arc;

use async_trait::async_trait;
use relay_types::{RelayError, ScanFilter};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A serial port the OS reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub path: String,
    pub description: Option<String>,
}

/// Something that happened on an open serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// Raw bytes, not yet split into lines.
    Data(Vec<u8>),
    Error(String),
    Closed,
}

/// Write half of an open serial port.
#[async_trait]
pub trait SerialPort: Send + Sync {
    async fn write(&self, bytes: &[u8]) -> Result<(), RelayError>;

    /// Release the port. The event stream ends afterwards.
    async fn close(&self);
}

/// An open port: the write half plus its event stream.
pub struct SerialLink {
    pub port: Arc<dyn SerialPort>,
    pub events: mpsc::Receiver<SerialEvent>,
}

#[async_trait]
pub trait SerialDriver: Send + Sync {
    async fn list_ports(&self) -> Result<Vec<PortInfo>, RelayError>;

    /// Open `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// [`RelayError::PortBusy`] when another process holds the port,
    /// [`RelayError::DeviceNotFound`] when the path does not exist.
    async fn open(&self, path: &str, baud_rate: u32) -> Result<SerialLink, RelayError>;
}

/// A peripheral found by a scan. Reconnects reuse the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle {
    pub address: String,
    pub name: Option<String>,
}

/// Something that happened on a GATT connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The link dropped without being asked to.
    Disconnected,
}

/// An open GATT connection.
#[async_trait]
pub trait GattSession: Send + Sync {
    async fn discover_service(&self, service: Uuid) -> Result<(), RelayError>;

    /// Resolve `characteristic` inside `service`.
    async fn get_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<(), RelayError>;

    /// Enable notifications; values arrive as [`GattEvent::Notification`].
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), RelayError>;

    async fn write_value(&self, characteristic: Uuid, bytes: &[u8]) -> Result<(), RelayError>;

    async fn read_value(&self, characteristic: Uuid) -> Result<Vec<u8>, RelayError>;

    /// Tear the link down. The event stream ends afterwards.
    async fn disconnect(&self);
}

/// A connected peripheral: the session plus its event stream.
pub struct GattLink {
    pub session: Arc<dyn GattSession>,
    pub events: mpsc::Receiver<GattEvent>,
}

#[async_trait]
pub trait BleDriver: Send + Sync {
    /// Find the first peripheral matching `filter`.
    async fn scan(&self, filter: &ScanFilter) -> Result<DeviceHandle, RelayError>;

    /// Open a GATT connection. May take arbitrarily long; the manager bounds
    /// it with its connect timeout.
    async fn connect(&self, device: &DeviceHandle) -> Result<GattLink, RelayError>;
}
