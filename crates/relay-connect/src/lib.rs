//! `relay-connect` – owns every live device connection.
//!
//! # Modules
//!
//! - [`transport`] – the driver traits the engine consumes (serial ports,
//!   BLE scan/connect, GATT sessions). Real drivers live outside this crate.
//! - [`manager`] – the [`ConnectionManager`] state machine: connect,
//!   disconnect, send, remove, BLE retries, keep-alive and reconnect.
//! - [`framer`] – newline framing for serial byte streams.
//! - [`sim`] – in-process drivers for tests and the CLI demo mode.

pub mod framer;
pub mod manager;
pub mod sim;
pub mod transport;

pub use framer::LineFramer;
pub use manager::{ConnectionInfo, ConnectionManager, ConnectionPolicy};
pub use transport::{
    BleDriver, DeviceHandle, GattEvent, GattLink, GattSession, PortInfo, SerialDriver,
    SerialEvent, SerialLink, SerialPort,
};
