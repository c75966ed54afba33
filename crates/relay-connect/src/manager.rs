//! [`ConnectionManager`] – owner of every live connection.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Connected
//!       ▲                       │              │ link lost
//!       │◀────── failure ───────┘              ▼
//!       │◀─────── failure / manual ──── Reconnecting ──▶ Connected
//! ```
//!
//! The connection map is the only shared mutable state and sits behind one
//! async mutex. Every transition is made while holding it, and the status
//! event is published before the lock is released, so subscribers see
//! transitions in the order they were committed.
//!
//! Each connect attempt gets a fresh *generation*. Background work (data
//! pumps, reconnects) carries the generation it was started for and only
//! commits if the record still has it. `disconnect` bumps the generation and
//! sets `manual_disconnect`, so an in-flight reconnect can never undo a
//! user-initiated disconnect.
//!
//! Serial connections do not reconnect: a driver error or close removes the
//! record. BLE connections get one reconnect attempt after an unexpected
//! link loss and otherwise stay in the map as `Disconnected` until removed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use relay_hub::{CommandHandler, RelayHub};
use relay_profiles::decoders::uart;
use relay_profiles::{Decoded, DeviceProfile, ProfileRegistry};
use relay_types::{
    ConnectParams, ConnectionState, Event, RelayError, ScanFilter, StatusEvent, TransportKind,
    validate_connection_id,
};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use crate::framer::LineFramer;
use crate::transport::{
    BleDriver, DeviceHandle, GattEvent, GattLink, GattSession, PortInfo, SerialDriver,
    SerialEvent, SerialLink, SerialPort,
};

/// Timing of the BLE connect procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Upper bound on the GATT connect call.
    pub connect_timeout: Duration,
    /// Pause between GATT connect and service discovery.
    pub settle_delay: Duration,
    pub discovery_attempts: u32,
    pub discovery_backoff: Duration,
    /// Pause between an unexpected link loss and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Pause after closing a previous BLE handle for the same id.
    pub teardown_grace: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(600),
            discovery_attempts: 3,
            discovery_backoff: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            teardown_grace: Duration::from_millis(500),
        }
    }
}

/// Snapshot of one connection, for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub profile: Option<String>,
    /// BLE address of the peripheral, once scanned.
    pub device: Option<String>,
    pub keep_alive: bool,
}

#[derive(Clone)]
enum Link {
    Serial(Arc<dyn SerialPort>),
    Ble(Arc<dyn GattSession>),
}

impl Link {
    async fn close(&self) {
        match self {
            Link::Serial(port) => port.close().await,
            Link::Ble(session) => session.disconnect().await,
        }
    }
}

struct ConnectionRecord {
    transport: TransportKind,
    state: ConnectionState,
    manual_disconnect: bool,
    generation: u64,
    profile_key: Option<String>,
    profile: Option<Arc<DeviceProfile>>,
    device: Option<DeviceHandle>,
    link: Option<Link>,
    pump: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    fn new(params: &ConnectParams, profile: Option<Arc<DeviceProfile>>, generation: u64) -> Self {
        Self {
            transport: params.transport(),
            state: ConnectionState::Disconnected,
            manual_disconnect: false,
            generation,
            profile_key: params.profile_key().map(str::to_string),
            profile,
            device: None,
            link: None,
            pump: None,
            keep_alive: None,
        }
    }

    /// Stop the keep-alive and hand back the link and pump for the caller to
    /// close or abort outside the lock.
    fn take_resources(&mut self) -> (Option<Link>, Option<JoinHandle<()>>) {
        if let Some(keep_alive) = self.keep_alive.take() {
            keep_alive.abort();
        }
        (self.link.take(), self.pump.take())
    }

    fn info(&self, id: &str) -> ConnectionInfo {
        ConnectionInfo {
            id: id.to_string(),
            transport: self.transport,
            state: self.state,
            profile: self.profile_key.clone(),
            device: self.device.as_ref().map(|d| d.address.clone()),
            keep_alive: self.keep_alive.as_ref().is_some_and(|h| !h.is_finished()),
        }
    }
}

/// Move `record` to `state` and publish the status event. Must be called with
/// the connection map locked. Leaving `Connected` always stops the keep-alive.
fn transition(
    hub: &RelayHub,
    id: &str,
    record: &mut ConnectionRecord,
    state: ConnectionState,
    detail: Option<String>,
) {
    if state != ConnectionState::Connected {
        if let Some(keep_alive) = record.keep_alive.take() {
            keep_alive.abort();
        }
    }
    if record.state == state && detail.is_none() {
        return;
    }
    info!(connection_id = %id, from = %record.state, to = %state, detail = ?detail, "connection state changed");
    record.state = state;
    hub.publish_status(StatusEvent::new(id, state, detail));
}

struct Inner {
    registry: Arc<ProfileRegistry>,
    hub: RelayHub,
    serial: Arc<dyn SerialDriver>,
    ble: Arc<dyn BleDriver>,
    policy: ConnectionPolicy,
    connections: Mutex<HashMap<String, ConnectionRecord>>,
    generations: AtomicU64,
}

/// Cheap to clone; all clones share the same connection map.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        hub: RelayHub,
        serial: Arc<dyn SerialDriver>,
        ble: Arc<dyn BleDriver>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                hub,
                serial,
                ble,
                policy,
                connections: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn hub(&self) -> &RelayHub {
        &self.inner.hub
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.inner.registry
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.inner.policy
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    // -----------------------------------------------------------------------
    // Command API
    // -----------------------------------------------------------------------

    /// Open connection `id`, replacing any handle already registered under
    /// it.
    ///
    /// # Errors
    ///
    /// * [`RelayError::InvalidConnectionId`] / [`RelayError::UnknownProfile`]
    ///   before anything is touched.
    /// * Serial: the driver's open error ([`RelayError::PortBusy`],
    ///   [`RelayError::DeviceNotFound`]); the record is removed.
    /// * BLE: [`RelayError::DeviceNotFound`], [`RelayError::ConnectTimeout`],
    ///   [`RelayError::ServiceDiscoveryFailed`] or a transport error; the
    ///   record stays as `Disconnected`.
    /// * [`RelayError::NotConnected`] when a newer `connect` or a
    ///   `disconnect` for the same id superseded this one.
    #[instrument(skip(self, params), fields(transport = %params.transport()))]
    pub async fn connect(&self, id: &str, params: ConnectParams) -> Result<(), RelayError> {
        validate_connection_id(id)?;
        let profile = match params.profile_key() {
            Some(key) => Some(self.inner.registry.lookup(key)?),
            None => None,
        };
        let generation = self.next_generation();

        let previous = {
            let mut map = self.inner.connections.lock().await;
            map.get_mut(id).map(|record| {
                record.generation = generation;
                record.take_resources()
            })
        };
        if let Some((link, pump)) = previous {
            if let Some(pump) = pump {
                pump.abort();
            }
            if let Some(link) = link {
                debug!(connection_id = %id, "closing previous handle");
                let was_ble = matches!(link, Link::Ble(_));
                link.close().await;
                if was_ble {
                    tokio::time::sleep(self.inner.policy.teardown_grace).await;
                }
            }
        }

        {
            let mut map = self.inner.connections.lock().await;
            let record = map
                .entry(id.to_string())
                .or_insert_with(|| ConnectionRecord::new(&params, profile.clone(), generation));
            *record = ConnectionRecord {
                state: record.state,
                ..ConnectionRecord::new(&params, profile.clone(), generation)
            };
            transition(&self.inner.hub, id, record, ConnectionState::Connecting, None);
        }

        match params {
            ConnectParams::Serial { path, baud_rate, .. } => {
                self.connect_serial(id, generation, &path, baud_rate, profile).await
            }
            ConnectParams::Ble { profile: key, filter } => {
                let profile = profile.ok_or(RelayError::UnknownProfile(key))?;
                self.connect_ble(id, generation, profile, filter).await
            }
        }
    }

    /// Close connection `id` and keep its record as `Disconnected`. Sets the
    /// manual-disconnect flag, so no reconnect follows.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: &str) -> Result<(), RelayError> {
        let generation = self.next_generation();
        let (link, pump) = {
            let mut map = self.inner.connections.lock().await;
            let record = map
                .get_mut(id)
                .ok_or_else(|| RelayError::UnknownConnection(id.to_string()))?;
            record.manual_disconnect = true;
            record.generation = generation;
            let resources = record.take_resources();
            transition(&self.inner.hub, id, record, ConnectionState::Disconnected, None);
            resources
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
        Ok(())
    }

    /// Write `bytes` to connection `id`: verbatim to a serial port, to the
    /// profile's control characteristic over BLE.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnknownConnection`] for an unknown id,
    /// [`RelayError::NotConnected`] when there is no open handle or the BLE
    /// profile has no control characteristic.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn send(&self, id: &str, bytes: &[u8]) -> Result<(), RelayError> {
        let (link, control) = {
            let map = self.inner.connections.lock().await;
            let record = map
                .get(id)
                .ok_or_else(|| RelayError::UnknownConnection(id.to_string()))?;
            match (&record.link, record.state) {
                (Some(link), ConnectionState::Connected) => {
                    (link.clone(), record.profile.as_ref().and_then(|p| p.control))
                }
                _ => return Err(RelayError::NotConnected(id.to_string())),
            }
        };

        match link {
            Link::Serial(port) => port.write(bytes).await,
            Link::Ble(session) => {
                let control = control.ok_or_else(|| RelayError::NotConnected(id.to_string()))?;
                session.write_value(control, bytes).await
            }
        }
    }

    /// Disconnect `id` and delete its record.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<(), RelayError> {
        self.disconnect(id).await?;
        self.inner.connections.lock().await.remove(id);
        info!(connection_id = %id, "connection removed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub async fn state(&self, id: &str) -> Option<ConnectionState> {
        self.inner.connections.lock().await.get(id).map(|r| r.state)
    }

    /// Every connection, sorted by id.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let map = self.inner.connections.lock().await;
        let mut list: Vec<ConnectionInfo> = map.iter().map(|(id, r)| r.info(id)).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn list_ports(&self) -> Result<Vec<PortInfo>, RelayError> {
        self.inner.serial.list_ports().await
    }

    /// Remove every connection, closing all transports.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.connections.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.remove(&id).await {
                debug!(connection_id = %id, error = %e, "already gone at shutdown");
            }
        }
        info!("connection manager shut down");
    }

    // -----------------------------------------------------------------------
    // Serial
    // -----------------------------------------------------------------------

    async fn connect_serial(
        &self,
        id: &str,
        generation: u64,
        path: &str,
        baud_rate: u32,
        profile: Option<Arc<DeviceProfile>>,
    ) -> Result<(), RelayError> {
        let SerialLink { port, events } = match self.inner.serial.open(path, baud_rate).await {
            Ok(link) => link,
            Err(e) => {
                warn!(connection_id = %id, path, error = %e, "serial open failed");
                self.drop_serial(id, generation, Some(e.to_string())).await;
                return Err(e);
            }
        };

        let mut map = self.inner.connections.lock().await;
        let Some(record) = map.get_mut(id).filter(|r| r.generation == generation) else {
            drop(map);
            port.close().await;
            return Err(RelayError::NotConnected(id.to_string()));
        };
        record.link = Some(Link::Serial(port));
        record.pump = Some(tokio::spawn(self.clone().serial_pump(
            id.to_string(),
            generation,
            profile,
            events,
        )));
        transition(&self.inner.hub, id, record, ConnectionState::Connected, None);
        info!(connection_id = %id, path, baud_rate, "serial port open");
        Ok(())
    }

    async fn serial_pump(
        self,
        id: String,
        generation: u64,
        profile: Option<Arc<DeviceProfile>>,
        mut events: mpsc::Receiver<SerialEvent>,
    ) {
        let mut framer = LineFramer::default();
        let mut detail = None;
        while let Some(event) = events.recv().await {
            match event {
                SerialEvent::Data(bytes) => {
                    for line in framer.push(&bytes) {
                        let decoded = match &profile {
                            Some(p) => p.decode(&line, None),
                            None => uart::decode_line(&line).into(),
                        };
                        self.emit(&id, None, decoded);
                    }
                }
                SerialEvent::Error(e) => {
                    warn!(connection_id = %id, error = %e, "serial driver error");
                    detail = Some(e);
                    break;
                }
                SerialEvent::Closed => break,
            }
        }
        self.drop_serial(&id, generation, detail).await;
    }

    /// Serial has no reconnect policy: the record goes away.
    async fn drop_serial(&self, id: &str, generation: u64, detail: Option<String>) {
        let link = {
            let mut map = self.inner.connections.lock().await;
            if !map.get(id).is_some_and(|r| r.generation == generation) {
                return;
            }
            let Some(mut record) = map.remove(id) else {
                return;
            };
            let (link, _pump) = record.take_resources();
            transition(&self.inner.hub, id, &mut record, ConnectionState::Disconnected, detail);
            link
        };
        if let Some(link) = link {
            link.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // BLE
    // -----------------------------------------------------------------------

    async fn connect_ble(
        &self,
        id: &str,
        generation: u64,
        profile: Arc<DeviceProfile>,
        filter: ScanFilter,
    ) -> Result<(), RelayError> {
        let filter = merge_filter(profile.scan_filter(), filter);
        let device = match self.inner.ble.scan(&filter).await {
            Ok(device) => device,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "scan failed");
                self.fail_ble(id, generation, &e).await;
                return Err(e);
            }
        };
        debug!(connection_id = %id, address = %device.address, name = ?device.name, "peripheral found");

        {
            let mut map = self.inner.connections.lock().await;
            if let Some(record) = map.get_mut(id).filter(|r| r.generation == generation) {
                record.device = Some(device.clone());
            }
        }
        self.establish_ble(id, generation, profile, device).await
    }

    /// Steps shared by first connect and reconnect: bounded GATT connect,
    /// settle, discovery with retries, subscriptions, start sequence,
    /// keep-alive, commit.
    async fn establish_ble(
        &self,
        id: &str,
        generation: u64,
        profile: Arc<DeviceProfile>,
        device: DeviceHandle,
    ) -> Result<(), RelayError> {
        let timeout = self.inner.policy.connect_timeout;
        let link = match tokio::time::timeout(timeout, self.inner.ble.connect(&device)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(connection_id = %id, error = %e, "gatt connect failed");
                self.fail_ble(id, generation, &e).await;
                return Err(e);
            }
            Err(_) => {
                let e = RelayError::ConnectTimeout {
                    id: id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(connection_id = %id, error = %e, "gatt connect abandoned");
                self.fail_ble(id, generation, &e).await;
                return Err(e);
            }
        };

        let GattLink { session, events } = link;
        match self.prepare_ble(id, generation, &profile, &session, events).await {
            Ok(pump) => self.commit_ble(id, generation, &profile, session, pump).await,
            Err(e) => {
                session.disconnect().await;
                self.fail_ble(id, generation, &e).await;
                Err(e)
            }
        }
    }

    async fn prepare_ble(
        &self,
        id: &str,
        generation: u64,
        profile: &Arc<DeviceProfile>,
        session: &Arc<dyn GattSession>,
        events: mpsc::Receiver<GattEvent>,
    ) -> Result<JoinHandle<()>, RelayError> {
        tokio::time::sleep(self.inner.policy.settle_delay).await;
        self.ensure_current(id, generation).await?;
        self.discover(id, generation, profile, session).await?;

        for (channel, characteristic) in profile.characteristics.entries() {
            session.get_characteristic(profile.service, characteristic).await?;
            session.subscribe(characteristic).await?;
            debug!(connection_id = %id, channel = ?channel, %characteristic, "subscribed");
        }

        let pump = tokio::spawn(ble_pump(
            self.clone(),
            id.to_string(),
            generation,
            Arc::clone(profile),
            events,
        ));

        if let Err(e) = self.run_start_sequence(id, profile, session).await {
            pump.abort();
            return Err(e);
        }
        Ok(pump)
    }

    async fn discover(
        &self,
        id: &str,
        generation: u64,
        profile: &DeviceProfile,
        session: &Arc<dyn GattSession>,
    ) -> Result<(), RelayError> {
        let attempts = self.inner.policy.discovery_attempts.max(1);
        for attempt in 1..=attempts {
            match session.discover_service(profile.service).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(connection_id = %id, attempt, attempts, error = %e, "service discovery failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.inner.policy.discovery_backoff).await;
                        self.ensure_current(id, generation).await?;
                    }
                }
            }
        }
        Err(RelayError::ServiceDiscoveryFailed {
            service: profile.service.to_string(),
            attempts,
        })
    }

    async fn run_start_sequence(
        &self,
        id: &str,
        profile: &DeviceProfile,
        session: &Arc<dyn GattSession>,
    ) -> Result<(), RelayError> {
        if profile.start_sequence.is_empty() {
            return Ok(());
        }
        let Some(control) = profile.control else {
            warn!(connection_id = %id, profile = %profile.name, "start sequence without control characteristic skipped");
            return Ok(());
        };
        for (i, step) in profile.start_sequence.iter().enumerate() {
            session.write_value(control, &step.bytes).await?;
            trace!(connection_id = %id, step = i, "start command written");
            tokio::time::sleep(step.wait).await;
        }
        Ok(())
    }

    async fn commit_ble(
        &self,
        id: &str,
        generation: u64,
        profile: &DeviceProfile,
        session: Arc<dyn GattSession>,
        pump: JoinHandle<()>,
    ) -> Result<(), RelayError> {
        let mut map = self.inner.connections.lock().await;
        let current = map
            .get_mut(id)
            .filter(|r| r.generation == generation && !r.manual_disconnect);
        let Some(record) = current else {
            drop(map);
            pump.abort();
            session.disconnect().await;
            debug!(connection_id = %id, "connect superseded");
            return Err(RelayError::NotConnected(id.to_string()));
        };

        record.keep_alive = spawn_keep_alive(id, profile, Arc::clone(&session));
        record.link = Some(Link::Ble(session));
        record.pump = Some(pump);
        transition(&self.inner.hub, id, record, ConnectionState::Connected, None);
        Ok(())
    }

    /// Leave the record in place as `Disconnected` after a failed attempt.
    async fn fail_ble(&self, id: &str, generation: u64, error: &RelayError) {
        let (link, pump) = {
            let mut map = self.inner.connections.lock().await;
            let Some(record) = map.get_mut(id).filter(|r| r.generation == generation) else {
                return;
            };
            let resources = record.take_resources();
            transition(
                &self.inner.hub,
                id,
                record,
                ConnectionState::Disconnected,
                Some(error.to_string()),
            );
            resources
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// `Err(NotConnected)` once a newer connect or a disconnect superseded
    /// `generation`.
    async fn ensure_current(&self, id: &str, generation: u64) -> Result<(), RelayError> {
        let map = self.inner.connections.lock().await;
        match map.get(id) {
            Some(r) if r.generation == generation && !r.manual_disconnect => Ok(()),
            _ => Err(RelayError::NotConnected(id.to_string())),
        }
    }

    /// The BLE pump saw its link go away.
    async fn link_lost(&self, id: &str, generation: u64) {
        let (lost, retry) = {
            let mut map = self.inner.connections.lock().await;
            let Some(record) = map.get_mut(id).filter(|r| r.generation == generation) else {
                trace!(connection_id = %id, "stale link loss ignored");
                return;
            };
            let hub = &self.inner.hub;
            // The pump handle belongs to the task running this; detach it.
            let (lost, _pump) = record.take_resources();

            if record.manual_disconnect {
                transition(hub, id, record, ConnectionState::Disconnected, None);
                (lost, None)
            } else if record.state != ConnectionState::Connected {
                // Still connecting; make the in-flight attempt fail its commit.
                record.generation = self.next_generation();
                transition(
                    hub,
                    id,
                    record,
                    ConnectionState::Disconnected,
                    Some("link lost while connecting".to_string()),
                );
                (lost, None)
            } else if let (Some(device), Some(profile)) = (record.device.clone(), record.profile.clone()) {
                let next = self.next_generation();
                record.generation = next;
                transition(
                    hub,
                    id,
                    record,
                    ConnectionState::Reconnecting,
                    Some("link lost".to_string()),
                );
                (lost, Some((device, profile, next)))
            } else {
                transition(hub, id, record, ConnectionState::Disconnected, None);
                (lost, None)
            }
        };

        if let Some(link) = lost {
            link.close().await;
        }
        let Some((device, profile, next)) = retry else {
            return;
        };

        let delay = self.inner.policy.reconnect_delay;
        warn!(connection_id = %id, delay_ms = delay.as_millis() as u64, "unexpected disconnect, reconnect scheduled");
        tokio::time::sleep(delay).await;

        {
            let mut map = self.inner.connections.lock().await;
            let Some(record) = map.get_mut(id).filter(|r| r.generation == next) else {
                debug!(connection_id = %id, "reconnect cancelled");
                return;
            };
            if record.manual_disconnect {
                transition(&self.inner.hub, id, record, ConnectionState::Disconnected, None);
                return;
            }
        }

        match self.establish_ble(id, next, profile, device).await {
            Ok(()) => info!(connection_id = %id, "reconnected"),
            Err(e) => warn!(connection_id = %id, error = %e, "reconnect failed"),
        }
    }

    fn emit(&self, id: &str, channel: Option<&str>, decoded: Decoded) {
        match decoded {
            Decoded::Incomplete => trace!(connection_id = %id, channel = ?channel, "incomplete frame"),
            Decoded::Payloads(payloads) => {
                for payload in payloads {
                    self.inner
                        .hub
                        .publish_data(Event::new(id, channel.map(str::to_string), payload));
                }
            }
        }
    }
}

/// Caller-supplied filter fields win over the profile's.
fn merge_filter(profile: ScanFilter, requested: ScanFilter) -> ScanFilter {
    ScanFilter {
        name_prefix: requested.name_prefix.or(profile.name_prefix),
        services: if requested.services.is_empty() {
            profile.services
        } else {
            requested.services
        },
    }
}

/// One task per BLE connection: decodes notifications in arrival order and
/// reacts to link loss.
fn ble_pump(
    manager: ConnectionManager,
    id: String,
    generation: u64,
    profile: Arc<DeviceProfile>,
    mut events: mpsc::Receiver<GattEvent>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        while let Some(event) = events.recv().await {
            match event {
                GattEvent::Notification { characteristic, value } => {
                    match profile.characteristics.channel_of(characteristic) {
                        Some(channel) => manager.emit(&id, channel, profile.decode(&value, channel)),
                        None => trace!(connection_id = %id, %characteristic, "notification on undeclared characteristic"),
                    }
                }
                GattEvent::Disconnected => break,
            }
        }
        manager.link_lost(&id, generation).await;
    })
}

fn spawn_keep_alive(
    id: &str,
    profile: &DeviceProfile,
    session: Arc<dyn GattSession>,
) -> Option<JoinHandle<()>> {
    let keep_alive = profile.keep_alive.clone()?;
    if keep_alive.interval.is_zero() {
        return None;
    }
    let Some(control) = profile.control else {
        warn!(connection_id = %id, profile = %profile.name, "keep-alive without control characteristic skipped");
        return None;
    };
    let id = id.to_string();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keep_alive.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let result = match &keep_alive.command {
                Some(bytes) => session.write_value(control, bytes).await,
                None => session.read_value(control).await.map(|_| ()),
            };
            match result {
                Ok(()) => trace!(connection_id = %id, "keep-alive"),
                Err(e) => warn!(connection_id = %id, error = %e, "keep-alive failed"),
            }
        }
    }))
}

#[async_trait]
impl CommandHandler for ConnectionManager {
    async fn connect(&self, id: &str, params: ConnectParams) -> Result<(), RelayError> {
        ConnectionManager::connect(self, id, params).await
    }

    async fn disconnect(&self, id: &str) -> Result<(), RelayError> {
        ConnectionManager::disconnect(self, id).await
    }

    async fn send(&self, id: &str, bytes: &[u8]) -> Result<(), RelayError> {
        ConnectionManager::send(self, id, bytes).await
    }

    async fn remove(&self, id: &str) -> Result<(), RelayError> {
        ConnectionManager::remove(self, id).await
    }
}
