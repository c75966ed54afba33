//! OSC bridge.
//!
//! # Address space
//!
//! ```text
//! standard mode:
//!   {base}              [connection_id, payload]     one message per data event
//!   {base}/status       [connection_id, state]       one message per transition
//!
//! flattened mode:
//!   {base}/{id}/{leaf path}   [value...]             one message per leaf
//!
//! inbound:
//!   /send               [connection_id, message]     -> CommandHandler::send
//! ```
//!
//! `{id}` is the connection id with every character outside `[A-Za-z0-9_]`
//! replaced by `_`.

pub mod bridge;
pub mod flatten;
pub mod sender;

use serde::{Deserialize, Serialize};

pub use bridge::{OscBridge, OscListener, SEND_ADDRESS};
pub use flatten::flatten;
pub use sender::OscSender;

/// How outbound data events are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OscMode {
    /// `{base} [connection_id, payload]` with structured payloads as compact JSON.
    #[default]
    Standard,
    /// One message per leaf value.
    Flattened,
}

impl std::str::FromStr for OscMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(OscMode::Standard),
            "flattened" | "flat" => Ok(OscMode::Flattened),
            other => Err(format!("unknown OSC mode '{other}'")),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_target_port() -> u16 {
    9000
}

fn default_listen_port() -> u16 {
    9001
}

fn default_base_address() -> String {
    "/serial".to_string()
}

fn default_enabled() -> bool {
    true
}

/// `[osc]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: OscMode,
    #[serde(default = "default_host")]
    pub target_host: String,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    /// UDP port for inbound `/send` commands.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_base_address")]
    pub base_address: String,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            mode: OscMode::default(),
            target_host: default_host(),
            target_port: default_target_port(),
            listen_port: default_listen_port(),
            base_address: default_base_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Flattened".parse::<OscMode>(), Ok(OscMode::Flattened));
        assert_eq!("standard".parse::<OscMode>(), Ok(OscMode::Standard));
        assert!("loud".parse::<OscMode>().is_err());
    }

    #[test]
    fn defaults() {
        let s = OscSettings::default();
        assert_eq!(s.base_address, "/serial");
        assert_eq!((s.target_port, s.listen_port), (9000, 9001));
        assert_eq!(s.mode, OscMode::Standard);
    }
}
