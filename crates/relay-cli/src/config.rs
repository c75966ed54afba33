//! Configuration vault – reads/writes `~/.relay/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_connect::ConnectionPolicy;
use relay_hub::OscSettings;
use relay_profiles::ProfileDefinition;
use serde::{Deserialize, Serialize};

/// `[policy]` section: BLE connect timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,
    #[serde(default = "default_discovery_backoff_ms")]
    pub discovery_backoff_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_settle_delay_ms() -> u64 {
    600
}
fn default_discovery_attempts() -> u32 {
    3
}
fn default_discovery_backoff_ms() -> u64 {
    1_000
}
fn default_reconnect_delay_ms() -> u64 {
    2_000
}
fn default_teardown_grace_ms() -> u64 {
    500
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            discovery_attempts: default_discovery_attempts(),
            discovery_backoff_ms: default_discovery_backoff_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            teardown_grace_ms: default_teardown_grace_ms(),
        }
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            discovery_attempts: self.discovery_attempts,
            discovery_backoff: Duration::from_millis(self.discovery_backoff_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            teardown_grace: Duration::from_millis(self.teardown_grace_ms),
        }
    }
}

/// Persisted configuration stored in `~/.relay/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the WebSocket event feed.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Events buffered per hub subscriber before it starts lagging.
    #[serde(default = "default_hub_capacity")]
    pub hub_capacity: usize,

    #[serde(default)]
    pub osc: OscSettings,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Device profiles registered after the built-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ProfileDefinition>,
}

fn default_ws_port() -> u16 {
    8765
}
fn default_hub_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            hub_capacity: default_hub_capacity(),
            osc: OscSettings::default(),
            policy: PolicyConfig::default(),
            profiles: Vec::new(),
        }
    }
}

/// Return the path to `~/.relay/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".relay").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `RELAY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RELAY_OSC_HOST` | `osc.target_host` |
/// | `RELAY_OSC_PORT` | `osc.target_port` |
/// | `RELAY_OSC_LISTEN_PORT` | `osc.listen_port` |
/// | `RELAY_OSC_MODE` | `osc.mode` |
/// | `RELAY_WS_PORT` | `ws_port` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RELAY_OSC_HOST") {
        cfg.osc.target_host = v;
    }
    if let Some(port) = env_port("RELAY_OSC_PORT") {
        cfg.osc.target_port = port;
    }
    if let Some(port) = env_port("RELAY_OSC_LISTEN_PORT") {
        cfg.osc.listen_port = port;
    }
    if let Ok(v) = std::env::var("RELAY_OSC_MODE")
        && let Ok(mode) = v.parse()
    {
        cfg.osc.mode = mode;
    }
    if let Some(port) = env_port("RELAY_WS_PORT") {
        cfg.ws_port = port;
    }
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name).ok()?.parse().ok()
}

/// Save the config to disk, creating `~/.relay/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_hub::OscMode;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_meta = std::fs::metadata(path.parent().expect("parent")).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.hub_capacity, 1024);
        assert_eq!(loaded.osc.base_address, "/serial");
        assert_eq!(loaded.policy, PolicyConfig::default());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: Config = toml::from_str("ws_port = 9999\n[osc]\nmode = \"flattened\"\n").expect("parse");
        assert_eq!(cfg.ws_port, 9999);
        assert_eq!(cfg.osc.mode, OscMode::Flattened);
        assert_eq!(cfg.osc.listen_port, 9001);
        assert_eq!(cfg.hub_capacity, 1024);
        assert_eq!(cfg.policy.to_policy(), ConnectionPolicy::default());
    }

    #[test]
    fn profiles_are_read_from_the_file() {
        let raw = r#"
            [[profiles]]
            key = "thermo"
            name = "Thermometer"
            service = "0000181a-0000-1000-8000-00805f9b34fb"
            characteristic = "00002a6e-0000-1000-8000-00805f9b34fb"
            decoder = { kind = "uart" }
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.profiles.len(), 1);
        let (key, profile) = cfg.profiles[0].clone().into_profile().expect("valid");
        assert_eq!(key, "thermo");
        assert_eq!(profile.name, "Thermometer");
    }

    #[test]
    fn config_path_points_to_relay_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".relay"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    // Each test below owns a distinct variable.

    #[test]
    fn env_overrides_osc_target() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("RELAY_OSC_HOST", "192.168.1.20");
            std::env::set_var("RELAY_OSC_PORT", "57120");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.osc.target_host, "192.168.1.20");
        assert_eq!(cfg.osc.target_port, 57120);
        unsafe {
            std::env::remove_var("RELAY_OSC_HOST");
            std::env::remove_var("RELAY_OSC_PORT");
        }
    }

    #[test]
    fn env_overrides_mode() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("RELAY_OSC_MODE", "flat") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.osc.mode, OscMode::Flattened);
        unsafe { std::env::remove_var("RELAY_OSC_MODE") };
    }

    #[test]
    fn env_override_ignores_invalid_port() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("RELAY_WS_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ws_port, 8765);
        unsafe { std::env::remove_var("RELAY_WS_PORT") };
    }

    #[test]
    fn env_override_listen_port() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("RELAY_OSC_LISTEN_PORT", "7001") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.osc.listen_port, 7001);
        unsafe { std::env::remove_var("RELAY_OSC_LISTEN_PORT") };
    }
}
