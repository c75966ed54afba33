use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Physical transport a connection rides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// USB / UART serial port, line-delimited frames.
    Serial,
    /// Bluetooth Low Energy GATT peripheral.
    Ble,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Ble => write!(f, "ble"),
        }
    }
}

/// Lifecycle state of a single connection.
///
/// `Disconnected` is re-enterable; no state is terminal while the record
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Decoded value carried by a data [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// A single numeric reading.
    Scalar(f64),
    /// Free-form text (e.g. a UART line that is neither numeric nor JSON).
    Text(String),
    /// A nested record, usually `{ "type": ..., "data": { ... } }`.
    Record(serde_json::Value),
}

impl Payload {
    /// Compact string form used by the OSC standard mode and logs.
    pub fn to_compact_string(&self) -> String {
        match self {
            Payload::Scalar(v) => v.to_string(),
            Payload::Text(s) => s.clone(),
            Payload::Record(v) => v.to_string(),
        }
    }
}

/// A decoded reading produced by a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub connection_id: String,
    /// Profile channel the raw bytes arrived on (e.g. `"tp9"`, `"accel"`).
    pub channel: Option<String>,
    pub payload: Payload,
}

impl Event {
    pub fn new(connection_id: impl Into<String>, channel: Option<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            connection_id: connection_id.into(),
            channel,
            payload,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// A lifecycle transition of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub connection_id: String,
    pub state: ConnectionState,
    /// Human-readable reason, e.g. the error that caused a fallback.
    pub detail: Option<String>,
}

impl StatusEvent {
    pub fn new(connection_id: impl Into<String>, state: ConnectionState, detail: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            connection_id: connection_id.into(),
            state,
            detail,
        }
    }
}

/// Everything that flows through the relay hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HubEvent {
    Data(Event),
    Status(StatusEvent),
}

impl HubEvent {
    pub fn connection_id(&self) -> &str {
        match self {
            HubEvent::Data(e) => &e.connection_id,
            HubEvent::Status(s) => &s.connection_id,
        }
    }
}

/// Narrows a BLE scan to the peripheral a profile describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Advertised local-name prefix, e.g. `"Muse"`.
    #[serde(default)]
    pub name_prefix: Option<String>,
    /// Advertised service UUIDs; empty matches any.
    #[serde(default)]
    pub services: Vec<Uuid>,
}

/// Transport-specific arguments of a `connect` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ConnectParams {
    Serial {
        path: String,
        baud_rate: u32,
        /// Decoder profile; the generic UART text decoder when absent.
        #[serde(default)]
        profile: Option<String>,
    },
    Ble {
        profile: String,
        #[serde(default)]
        filter: ScanFilter,
    },
}

impl ConnectParams {
    pub fn transport(&self) -> TransportKind {
        match self {
            ConnectParams::Serial { .. } => TransportKind::Serial,
            ConnectParams::Ble { .. } => TransportKind::Ble,
        }
    }

    pub fn profile_key(&self) -> Option<&str> {
        match self {
            ConnectParams::Serial { profile, .. } => profile.as_deref(),
            ConnectParams::Ble { profile, .. } => Some(profile),
        }
    }
}

/// Check that `id` matches `[A-Za-z0-9_]+`.
pub fn validate_connection_id(id: &str) -> Result<(), RelayError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(RelayError::InvalidConnectionId(id.to_string()))
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_connection_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Error type shared by the profile registry, connection manager and bridges.
///
/// None of these are fatal to the process: a failing connection never stops
/// the engine from serving the others.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayError {
    #[error("Port busy: {0}")]
    PortBusy(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connect timeout on '{id}' after {timeout_ms} ms")]
    ConnectTimeout { id: String, timeout_ms: u64 },

    #[error("Service discovery failed for {service} after {attempts} attempt(s)")]
    ServiceDiscoveryFailed { service: String, attempts: u32 },

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Connection '{0}' is not connected")]
    NotConnected(String),

    #[error("Duplicate profile: {0}")]
    DuplicateProfile(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Invalid connection id '{0}' (expected [A-Za-z0-9_]+)")]
    InvalidConnectionId(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("OSC error: {0}")]
    Osc(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
