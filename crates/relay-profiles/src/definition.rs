//! Device profiles declared as data.
//!
//! Lets users add hardware from the config file without recompiling:
//!
//! ```toml
//! [[profiles]]
//! key = "esp32_imu"
//! name = "ESP32 IMU"
//! service = "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
//! control = "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
//! decoder = { kind = "imu", axis = "accel", scale = 0.001 }
//!
//! [[profiles.channels]]
//! tag = "accel"
//! uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
//!
//! [[profiles.start_sequence]]
//! text = "start"
//! wait_ms = 100
//!
//! [profiles.keep_alive]
//! interval_ms = 5000
//! ```

use std::time::Duration;

use relay_types::RelayError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::builtin::encode_muse_command;
use crate::decoder::DecoderKind;
use crate::profile::{Characteristics, CommandStep, DeviceProfile, KeepAlive};

/// Bytes of a command, given either as text or as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBytes {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bytes: Vec<u8>,
    /// Apply Muse length-prefix framing to `text`.
    #[serde(default)]
    pub muse_framed: bool,
}

impl CommandBytes {
    /// `None` when neither text nor bytes were given.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.text {
            Some(text) if self.muse_framed => Some(encode_muse_command(text)),
            Some(text) => Some(text.as_bytes().to_vec()),
            None if !self.bytes.is_empty() => Some(self.bytes.clone()),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    #[serde(flatten)]
    pub command: CommandBytes,
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveDefinition {
    /// Omit both `text` and `bytes` for a passive read.
    #[serde(flatten)]
    pub command: CommandBytes,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub tag: String,
    pub uuid: Uuid,
}

/// A `[[profiles]]` entry of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDefinition {
    pub key: String,
    pub name: String,
    pub service: Uuid,
    /// Single untagged data characteristic. Mutually exclusive with `channels`.
    #[serde(default)]
    pub characteristic: Option<Uuid>,
    #[serde(default)]
    pub channels: Vec<ChannelDefinition>,
    #[serde(default)]
    pub control: Option<Uuid>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub start_sequence: Vec<CommandDefinition>,
    #[serde(default)]
    pub keep_alive: Option<KeepAliveDefinition>,
    pub decoder: DecoderKind,
}

impl ProfileDefinition {
    /// Validate and build the `(key, profile)` pair to register.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the key is empty, when both or
    /// neither of `characteristic` / `channels` are given, when a start step
    /// carries no bytes, or when the keep-alive interval is zero.
    pub fn into_profile(self) -> Result<(String, DeviceProfile), RelayError> {
        if self.key.trim().is_empty() {
            return Err(RelayError::Config("profile key must not be empty".to_string()));
        }

        let characteristics = match (self.characteristic, self.channels.is_empty()) {
            (Some(uuid), true) => Characteristics::Single(uuid),
            (None, false) => Characteristics::Channels(
                self.channels.into_iter().map(|c| (c.tag, c.uuid)).collect(),
            ),
            _ => {
                return Err(RelayError::Config(format!(
                    "profile '{}': declare exactly one of `characteristic` or `channels`",
                    self.key
                )));
            }
        };

        let mut start_sequence = Vec::with_capacity(self.start_sequence.len());
        for (i, step) in self.start_sequence.iter().enumerate() {
            let bytes = step.command.to_bytes().ok_or_else(|| {
                RelayError::Config(format!("profile '{}': start step {i} has no command", self.key))
            })?;
            start_sequence.push(CommandStep::new(bytes, Duration::from_millis(step.wait_ms)));
        }

        let mut profile = DeviceProfile::new(self.name, self.service, characteristics, self.decoder)
            .with_start_sequence(start_sequence);

        if let Some(control) = self.control {
            profile = profile.with_control(control);
        }
        if let Some(prefix) = self.name_prefix {
            profile = profile.with_name_prefix(prefix);
        }
        if let Some(ka) = self.keep_alive {
            if ka.interval_ms == 0 {
                return Err(RelayError::Config(format!(
                    "profile '{}': keep-alive interval must be positive",
                    self.key
                )));
            }
            profile = profile.with_keep_alive(KeepAlive {
                command: ka.command.to_bytes(),
                interval: Duration::from_millis(ka.interval_ms),
            });
        }

        Ok((self.key, profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ImuAxis;

    #[derive(Deserialize)]
    struct Wrapper {
        profiles: Vec<ProfileDefinition>,
    }

    const TOML: &str = r#"
        [[profiles]]
        key = "esp32_imu"
        name = "ESP32 IMU"
        service = "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        control = "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        decoder = { kind = "imu", axis = "accel", scale = 0.001 }

        [[profiles.channels]]
        tag = "accel"
        uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"

        [[profiles.start_sequence]]
        text = "start"
        wait_ms = 100

        [[profiles.start_sequence]]
        text = "d"
        muse_framed = true

        [profiles.keep_alive]
        interval_ms = 5000
    "#;

    #[test]
    fn toml_definition_builds_profile() {
        let wrapper: Wrapper = toml::from_str(TOML).unwrap();
        let def = wrapper.profiles.into_iter().next().unwrap();
        assert_eq!(
            def.decoder,
            DecoderKind::Imu {
                axis: ImuAxis::Accel,
                scale: 0.001
            }
        );

        let (key, profile) = def.into_profile().unwrap();
        assert_eq!(key, "esp32_imu");
        assert_eq!(profile.start_sequence.len(), 2);
        assert_eq!(profile.start_sequence[0].bytes, b"start".to_vec());
        assert_eq!(profile.start_sequence[0].wait, Duration::from_millis(100));
        assert_eq!(profile.start_sequence[1].bytes, vec![0x02, b'd', b'\n']);
        let ka = profile.keep_alive.unwrap();
        assert_eq!(ka.command, None);
        assert_eq!(ka.interval, Duration::from_secs(5));
    }

    #[test]
    fn both_characteristic_forms_is_rejected() {
        let wrapper: Wrapper = toml::from_str(TOML).unwrap();
        let mut def = wrapper.profiles.into_iter().next().unwrap();
        def.characteristic = Some(Uuid::from_u128(7));
        assert!(matches!(def.into_profile(), Err(RelayError::Config(_))));
    }

    #[test]
    fn empty_start_step_is_rejected() {
        let wrapper: Wrapper = toml::from_str(TOML).unwrap();
        let mut def = wrapper.profiles.into_iter().next().unwrap();
        def.start_sequence[0].command = CommandBytes::default();
        assert!(matches!(def.into_profile(), Err(RelayError::Config(_))));
    }

    #[test]
    fn raw_bytes_command() {
        let cmd = CommandBytes {
            text: None,
            bytes: vec![0x01, 0x02],
            muse_framed: false,
        };
        assert_eq!(cmd.to_bytes(), Some(vec![0x01, 0x02]));
        assert_eq!(CommandBytes::default().to_bytes(), None);
    }
}
