//! In-process simulated drivers for CI testing without physical hardware.
//!
//! [`SimSerialDriver`] exposes a fixed set of ports. By default every write
//! is echoed back as incoming data (a loopback cable), so a line sent with
//! `send` comes back through the decoder.
//!
//! [`SimBleDriver`] holds scripted peripherals. Tests inject notifications
//! and link drops, make connects hang or fail, make service discovery fail,
//! and inspect every GATT operation in the [`GattOp`] log.
//!
//! ```rust
//! use relay_connect::sim::{SimBleDriver, SimPeripheral};
//! use relay_profiles::builtin;
//!
//! let ble = SimBleDriver::new()
//!     .with_peripheral(SimPeripheral::for_profile("AA:01", "Polar H10", &builtin::heart_rate()));
//! ble.fail_discoveries(2);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use relay_profiles::DeviceProfile;
use relay_types::{RelayError, ScanFilter};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::transport::{
    BleDriver, DeviceHandle, GattEvent, GattLink, GattSession, PortInfo, SerialDriver,
    SerialEvent, SerialLink, SerialPort,
};

const EVENT_BUFFER: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Serial
// ────────────────────────────────────────────────────────────────────────────

struct SerialState {
    ports: Vec<PortInfo>,
    busy: HashSet<String>,
    open: HashMap<String, (u64, mpsc::Sender<SerialEvent>)>,
    next_handle: u64,
    writes: Vec<(String, Vec<u8>)>,
    loopback: bool,
}

#[derive(Clone)]
pub struct SimSerialDriver {
    state: Arc<Mutex<SerialState>>,
}

impl Default for SimSerialDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSerialDriver {
    /// A driver with no ports and loopback enabled.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SerialState {
                ports: Vec::new(),
                busy: HashSet::new(),
                open: HashMap::new(),
                next_handle: 0,
                writes: Vec::new(),
                loopback: true,
            })),
        }
    }

    #[must_use]
    pub fn with_port(self, path: impl Into<String>, description: Option<&str>) -> Self {
        lock(&self.state).ports.push(PortInfo {
            path: path.into(),
            description: description.map(str::to_string),
        });
        self
    }

    #[must_use]
    pub fn with_loopback(self, enabled: bool) -> Self {
        lock(&self.state).loopback = enabled;
        self
    }

    /// Pretend another process holds `path`.
    pub fn set_busy(&self, path: &str, busy: bool) {
        let mut state = lock(&self.state);
        if busy {
            state.busy.insert(path.to_string());
        } else {
            state.busy.remove(path);
        }
    }

    pub fn is_open(&self, path: &str) -> bool {
        lock(&self.state).open.contains_key(path)
    }

    /// Deliver `bytes` as if the device had sent them.
    pub async fn inject(&self, path: &str, bytes: &[u8]) -> bool {
        let tx = lock(&self.state).open.get(path).map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(SerialEvent::Data(bytes.to_vec())).await.is_ok(),
            None => false,
        }
    }

    /// Report a driver error (e.g. the cable was pulled) and close the port.
    pub async fn fail(&self, path: &str, message: &str) -> bool {
        let tx = lock(&self.state).open.remove(path).map(|(_, tx)| tx);
        match tx {
            Some(tx) => tx.send(SerialEvent::Error(message.to_string())).await.is_ok(),
            None => false,
        }
    }

    /// Every `(path, bytes)` written so far.
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).writes.clone()
    }
}

#[async_trait]
impl SerialDriver for SimSerialDriver {
    async fn list_ports(&self) -> Result<Vec<PortInfo>, RelayError> {
        Ok(lock(&self.state).ports.clone())
    }

    async fn open(&self, path: &str, baud_rate: u32) -> Result<SerialLink, RelayError> {
        let mut state = lock(&self.state);
        if !state.ports.iter().any(|p| p.path == path) {
            return Err(RelayError::DeviceNotFound(path.to_string()));
        }
        if state.busy.contains(path) || state.open.contains_key(path) {
            return Err(RelayError::PortBusy(path.to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.next_handle += 1;
        let handle = state.next_handle;
        state.open.insert(path.to_string(), (handle, tx));
        debug!(path, baud_rate, "sim serial port opened");

        Ok(SerialLink {
            port: Arc::new(SimSerialPort {
                path: path.to_string(),
                handle,
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct SimSerialPort {
    path: String,
    handle: u64,
    state: Arc<Mutex<SerialState>>,
}

#[async_trait]
impl SerialPort for SimSerialPort {
    async fn write(&self, bytes: &[u8]) -> Result<(), RelayError> {
        let echo = {
            let mut state = lock(&self.state);
            let tx = match state.open.get(&self.path) {
                Some((handle, tx)) if *handle == self.handle => tx.clone(),
                _ => return Err(RelayError::NotConnected(self.path.clone())),
            };
            state.writes.push((self.path.clone(), bytes.to_vec()));
            state.loopback.then_some(tx)
        };
        if let Some(tx) = echo {
            let _ = tx.send(SerialEvent::Data(bytes.to_vec())).await;
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = lock(&self.state);
        if state.open.get(&self.path).is_some_and(|(h, _)| *h == self.handle) {
            state.open.remove(&self.path);
            debug!(path = %self.path, "sim serial port closed");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BLE
// ────────────────────────────────────────────────────────────────────────────

/// One recorded GATT operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattOp {
    Connect(String),
    Discover(Uuid),
    Subscribe(Uuid),
    Write { characteristic: Uuid, bytes: Vec<u8> },
    Read(Uuid),
    Disconnect(String),
}

/// A scripted peripheral.
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub address: String,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub characteristics: Vec<Uuid>,
}

impl SimPeripheral {
    /// A peripheral exposing exactly what `profile` expects.
    pub fn for_profile(address: impl Into<String>, name: impl Into<String>, profile: &DeviceProfile) -> Self {
        let mut characteristics: Vec<Uuid> = profile
            .characteristics
            .entries()
            .into_iter()
            .map(|(_, uuid)| uuid)
            .collect();
        characteristics.extend(profile.control);
        Self {
            address: address.into(),
            name: Some(name.into()),
            services: vec![profile.service],
            characteristics,
        }
    }

    fn matches(&self, filter: &ScanFilter) -> bool {
        let name_ok = filter.name_prefix.as_deref().is_none_or(|prefix| {
            self.name.as_deref().is_some_and(|n| n.starts_with(prefix))
        });
        let service_ok =
            filter.services.is_empty() || filter.services.iter().any(|s| self.services.contains(s));
        name_ok && service_ok
    }
}

#[derive(Default)]
struct BleState {
    peripherals: Vec<SimPeripheral>,
    hang_connects: bool,
    failing_connects: u32,
    failing_discoveries: u32,
    links: HashMap<String, (u64, mpsc::Sender<GattEvent>)>,
    next_link: u64,
    log: Vec<GattOp>,
}

#[derive(Clone, Default)]
pub struct SimBleDriver {
    state: Arc<Mutex<BleState>>,
}

impl SimBleDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_peripheral(self, peripheral: SimPeripheral) -> Self {
        lock(&self.state).peripherals.push(peripheral);
        self
    }

    /// Make every subsequent GATT connect hang forever.
    pub fn set_hang_connects(&self, hang: bool) {
        lock(&self.state).hang_connects = hang;
    }

    /// Fail the next `n` GATT connects.
    pub fn fail_connects(&self, n: u32) {
        lock(&self.state).failing_connects = n;
    }

    /// Fail the next `n` service discoveries.
    pub fn fail_discoveries(&self, n: u32) {
        lock(&self.state).failing_discoveries = n;
    }

    /// Deliver a notification on `characteristic` of the linked peripheral.
    pub async fn notify(&self, address: &str, characteristic: Uuid, value: &[u8]) -> bool {
        let tx = lock(&self.state).links.get(address).map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx
                .send(GattEvent::Notification {
                    characteristic,
                    value: value.to_vec(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the link as if the peripheral walked out of range.
    pub fn drop_link(&self, address: &str) -> bool {
        match lock(&self.state).links.remove(address) {
            Some((_, tx)) => tx.try_send(GattEvent::Disconnected).is_ok(),
            None => false,
        }
    }

    pub fn is_linked(&self, address: &str) -> bool {
        lock(&self.state).links.contains_key(address)
    }

    pub fn log(&self) -> Vec<GattOp> {
        lock(&self.state).log.clone()
    }

    /// GATT connect attempts so far, including failed and hung ones.
    pub fn connect_count(&self) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|op| matches!(op, GattOp::Connect(_)))
            .count()
    }
}

#[async_trait]
impl BleDriver for SimBleDriver {
    async fn scan(&self, filter: &ScanFilter) -> Result<DeviceHandle, RelayError> {
        lock(&self.state)
            .peripherals
            .iter()
            .find(|p| p.matches(filter))
            .map(|p| DeviceHandle {
                address: p.address.clone(),
                name: p.name.clone(),
            })
            .ok_or_else(|| RelayError::DeviceNotFound(format!("no peripheral matches {filter:?}")))
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<GattLink, RelayError> {
        let hang = {
            let mut state = lock(&self.state);
            state.log.push(GattOp::Connect(device.address.clone()));
            state.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RelayError::Transport("simulated connect failure".to_string()));
        }
        let peripheral = state
            .peripherals
            .iter()
            .find(|p| p.address == device.address)
            .cloned()
            .ok_or_else(|| RelayError::DeviceNotFound(device.address.clone()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.next_link += 1;
        let link_id = state.next_link;
        state.links.insert(device.address.clone(), (link_id, tx));

        Ok(GattLink {
            session: Arc::new(SimGattSession {
                link_id,
                peripheral,
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct SimGattSession {
    link_id: u64,
    peripheral: SimPeripheral,
    state: Arc<Mutex<BleState>>,
}

impl SimGattSession {
    fn linked(&self) -> Result<MutexGuard<'_, BleState>, RelayError> {
        let state = lock(&self.state);
        match state.links.get(&self.peripheral.address) {
            Some((id, _)) if *id == self.link_id => Ok(state),
            _ => Err(RelayError::NotConnected(self.peripheral.address.clone())),
        }
    }
}

#[async_trait]
impl GattSession for SimGattSession {
    async fn discover_service(&self, service: Uuid) -> Result<(), RelayError> {
        let mut state = self.linked()?;
        state.log.push(GattOp::Discover(service));
        if state.failing_discoveries > 0 {
            state.failing_discoveries -= 1;
            return Err(RelayError::Transport("simulated discovery failure".to_string()));
        }
        if !self.peripheral.services.contains(&service) {
            return Err(RelayError::Transport(format!("service {service} not found")));
        }
        Ok(())
    }

    async fn get_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<(), RelayError> {
        let _state = self.linked()?;
        if self.peripheral.services.contains(&service)
            && self.peripheral.characteristics.contains(&characteristic)
        {
            Ok(())
        } else {
            Err(RelayError::Transport(format!(
                "characteristic {characteristic} not found in {service}"
            )))
        }
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), RelayError> {
        self.linked()?.log.push(GattOp::Subscribe(characteristic));
        Ok(())
    }

    async fn write_value(&self, characteristic: Uuid, bytes: &[u8]) -> Result<(), RelayError> {
        self.linked()?.log.push(GattOp::Write {
            characteristic,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    async fn read_value(&self, characteristic: Uuid) -> Result<Vec<u8>, RelayError> {
        self.linked()?.log.push(GattOp::Read(characteristic));
        Ok(Vec::new())
    }

    async fn disconnect(&self) {
        let mut state = lock(&self.state);
        let address = &self.peripheral.address;
        if state.links.get(address).is_some_and(|(id, _)| *id == self.link_id) {
            state.links.remove(address);
        }
        state.log.push(GattOp::Disconnect(address.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_profiles::builtin;

    #[tokio::test]
    async fn serial_open_rules() -> Result<(), Box<dyn std::error::Error>> {
        let driver = SimSerialDriver::new().with_port("/dev/ttyUSB0", Some("CP2102"));
        assert_eq!(driver.list_ports().await?.len(), 1);
        assert!(matches!(
            driver.open("/dev/nope", 9600).await,
            Err(RelayError::DeviceNotFound(_))
        ));

        let link = driver.open("/dev/ttyUSB0", 9600).await?;
        assert!(matches!(
            driver.open("/dev/ttyUSB0", 9600).await,
            Err(RelayError::PortBusy(_))
        ));
        link.port.close().await;
        assert!(!driver.is_open("/dev/ttyUSB0"));
        Ok(())
    }

    #[tokio::test]
    async fn serial_loopback_echoes_writes() -> Result<(), Box<dyn std::error::Error>> {
        let driver = SimSerialDriver::new().with_port("/dev/ttyUSB0", None);
        let mut link = driver.open("/dev/ttyUSB0", 115_200).await?;
        link.port.write(b"ping\n").await?;
        assert_eq!(link.events.recv().await, Some(SerialEvent::Data(b"ping\n".to_vec())));
        assert_eq!(driver.writes(), vec![("/dev/ttyUSB0".to_string(), b"ping\n".to_vec())]);
        Ok(())
    }

    #[tokio::test]
    async fn ble_scan_uses_service_and_name() -> Result<(), Box<dyn std::error::Error>> {
        let driver = SimBleDriver::new()
            .with_peripheral(SimPeripheral::for_profile("A", "Polar H10", &builtin::heart_rate()))
            .with_peripheral(SimPeripheral::for_profile("B", "Muse-0042", &builtin::muse()));

        let muse = driver.scan(&builtin::muse().scan_filter()).await?;
        assert_eq!(muse.address, "B");
        let hr = driver.scan(&builtin::heart_rate().scan_filter()).await?;
        assert_eq!(hr.address, "A");

        let nobody = ScanFilter {
            name_prefix: Some("Garmin".into()),
            services: Vec::new(),
        };
        assert!(matches!(driver.scan(&nobody).await, Err(RelayError::DeviceNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn dropped_link_reports_and_rejects_writes() -> Result<(), Box<dyn std::error::Error>> {
        let profile = builtin::generic_uart();
        let driver =
            SimBleDriver::new().with_peripheral(SimPeripheral::for_profile("A", "ESP32", &profile));
        let device = driver.scan(&profile.scan_filter()).await?;
        let mut link = driver.connect(&device).await?;

        assert!(driver.drop_link("A"));
        assert_eq!(link.events.recv().await, Some(GattEvent::Disconnected));
        assert_eq!(link.events.recv().await, None);
        assert!(link.session.write_value(builtin::NUS_RX, b"x").await.is_err());
        Ok(())
    }
}
