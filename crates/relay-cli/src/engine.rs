//! Wires registry, hub, connection manager and bridges together.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_connect::sim::{SimBleDriver, SimPeripheral, SimSerialDriver};
use relay_connect::ConnectionManager;
use relay_hub::{CommandHandler, EventFeed, OscBridge, RelayHub};
use relay_profiles::{ProfileDefinition, ProfileRegistry};
use relay_types::RelayError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;

/// Serial ports offered by the demo driver.
pub const DEMO_PORTS: [&str; 2] = ["/dev/ttySIM0", "/dev/ttySIM1"];

/// Built-ins first, then the config file's `[[profiles]]` in order.
pub fn build_registry(definitions: &[ProfileDefinition]) -> Result<ProfileRegistry, RelayError> {
    let mut registry = ProfileRegistry::with_builtins();
    for definition in definitions {
        let (key, profile) = definition.clone().into_profile()?;
        registry.register(key, profile)?;
    }
    Ok(registry)
}

/// Simulated drivers: loopback serial ports and one peripheral per profile.
pub fn demo_drivers(registry: &ProfileRegistry) -> (SimSerialDriver, SimBleDriver) {
    let serial = DEMO_PORTS
        .iter()
        .fold(SimSerialDriver::new(), |d, path| d.with_port(*path, Some("simulated loopback")));

    let mut ble = SimBleDriver::new();
    for (i, key) in registry.keys().into_iter().enumerate() {
        let Ok(profile) = registry.lookup(key) else {
            continue;
        };
        let name = match &profile.name_prefix {
            Some(prefix) => format!("{prefix}-SIM{i}"),
            None => format!("{}-SIM{i}", profile.name),
        };
        let address = format!("5A:11:00:00:00:{i:02X}");
        ble = ble.with_peripheral(SimPeripheral::for_profile(address, name, &profile));
    }
    (serial, ble)
}

/// A running engine. Dropping it leaves background tasks running; call
/// [`Engine::shutdown`].
pub struct Engine {
    pub manager: ConnectionManager,
    pub ws_addr: Option<SocketAddr>,
    pub osc_listen_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build everything and start the bridges. A bridge that cannot bind is
    /// logged and left out; the engine keeps serving the rest.
    pub async fn start(cfg: &Config) -> Result<Self, RelayError> {
        let registry = Arc::new(build_registry(&cfg.profiles)?);
        info!(profiles = registry.len(), "profile registry loaded");

        let hub = RelayHub::new(cfg.hub_capacity);
        let (serial, ble) = demo_drivers(&registry);
        let manager = ConnectionManager::new(
            registry,
            hub.clone(),
            Arc::new(serial),
            Arc::new(ble),
            cfg.policy.to_policy(),
        );
        let handler: Arc<dyn CommandHandler> = Arc::new(manager.clone());
        let mut tasks = Vec::new();
        let mut osc_listen_addr = None;

        if cfg.osc.enabled {
            let bridge = OscBridge::new(hub.clone(), cfg.osc.clone());
            match bridge.sender().await {
                Ok(sender) => {
                    info!(target_addr = %sender.target(), mode = ?cfg.osc.mode, "osc output ready");
                    tasks.push(bridge.spawn_outbound(sender));
                }
                Err(e) => warn!(error = %e, "osc output disabled"),
            }
            match bridge.listen().await {
                Ok(listener) => {
                    osc_listen_addr = listener.local_addr().ok();
                    tasks.push(tokio::spawn(listener.run(Arc::clone(&handler))));
                }
                Err(e) => warn!(error = %e, "osc input disabled"),
            }
        }

        let ws_addr = SocketAddr::from(([127, 0, 0, 1], cfg.ws_port));
        let ws_addr = match EventFeed::bind(ws_addr).await {
            Ok(listener) => {
                let local = listener.local_addr().ok();
                let feed = EventFeed::new(hub).with_handler(handler);
                tasks.push(tokio::spawn(feed.run(listener)));
                local
            }
            Err(e) => {
                warn!(error = %e, "websocket feed disabled");
                None
            }
        };

        Ok(Self {
            manager,
            ws_addr,
            osc_listen_addr,
            tasks,
        })
    }

    /// Close every connection and stop the bridges.
    pub async fn shutdown(self) {
        self.manager.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
    }
}
