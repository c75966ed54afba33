//! Profiles shipped with the relay.
//!
//! | Key | Device | Decoder |
//! |---|---|---|
//! | [`GENERIC_UART`] | Nordic UART Service bridges (ESP32, nRF) | [`DecoderKind::Uart`] |
//! | [`MUSE`] | Muse 2016 / Muse 2 (classic firmware) | [`DecoderKind::Muse`] |
//! | [`MUSE_ATHENA`] | Muse S (Athena firmware) | [`DecoderKind::Athena`] |
//! | [`HEART_RATE`] | Any standard BLE heart-rate strap | [`DecoderKind::HeartRate`] |

use std::time::Duration;

use uuid::Uuid;

use crate::decoder::DecoderKind;
use crate::profile::{Characteristics, CommandStep, DeviceProfile, KeepAlive};

pub const GENERIC_UART: &str = "generic_uart";
pub const MUSE: &str = "muse";
pub const MUSE_ATHENA: &str = "muse_athena";
pub const HEART_RATE: &str = "heart_rate";

// ── Nordic UART Service ──────────────────────────────────────────────────────

pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Host → device writes.
pub const NUS_RX: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Device → host notifications.
pub const NUS_TX: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

// ── Muse ─────────────────────────────────────────────────────────────────────

pub const MUSE_SERVICE: Uuid = Uuid::from_u128(0x0000fe8d_0000_1000_8000_00805f9b34fb);
pub const MUSE_CONTROL: Uuid = Uuid::from_u128(0x273e0001_4c4d_454d_96be_f03bac821358);
pub const MUSE_TP9: Uuid = Uuid::from_u128(0x273e0003_4c4d_454d_96be_f03bac821358);
pub const MUSE_AF7: Uuid = Uuid::from_u128(0x273e0004_4c4d_454d_96be_f03bac821358);
pub const MUSE_AF8: Uuid = Uuid::from_u128(0x273e0005_4c4d_454d_96be_f03bac821358);
pub const MUSE_TP10: Uuid = Uuid::from_u128(0x273e0006_4c4d_454d_96be_f03bac821358);
pub const MUSE_GYRO: Uuid = Uuid::from_u128(0x273e0009_4c4d_454d_96be_f03bac821358);
pub const MUSE_ACCEL: Uuid = Uuid::from_u128(0x273e000a_4c4d_454d_96be_f03bac821358);
pub const MUSE_ATHENA_SENSOR: Uuid = Uuid::from_u128(0x273e0013_4c4d_454d_96be_f03bac821358);

// ── Heart Rate (Bluetooth SIG) ───────────────────────────────────────────────

pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

const COMMAND_GAP: Duration = Duration::from_millis(200);

/// Frame a text command for the Muse control characteristic:
/// `[len, ascii..., '\n']` where `len` counts the ASCII bytes plus newline.
pub fn encode_muse_command(cmd: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(cmd.len() + 2);
    bytes.push((cmd.len() + 1).min(u8::MAX as usize) as u8);
    bytes.extend_from_slice(cmd.as_bytes());
    bytes.push(b'\n');
    bytes
}

fn muse_steps(commands: &[&str]) -> Vec<CommandStep> {
    commands
        .iter()
        .map(|c| CommandStep::new(encode_muse_command(c), COMMAND_GAP))
        .collect()
}

pub fn generic_uart() -> DeviceProfile {
    DeviceProfile::new(
        "Generic UART",
        NUS_SERVICE,
        Characteristics::Single(NUS_TX),
        DecoderKind::Uart,
    )
    .with_control(NUS_RX)
}

pub fn muse() -> DeviceProfile {
    let channels = [
        ("tp9", MUSE_TP9),
        ("af7", MUSE_AF7),
        ("af8", MUSE_AF8),
        ("tp10", MUSE_TP10),
        ("accel", MUSE_ACCEL),
        ("gyro", MUSE_GYRO),
    ]
    .into_iter()
    .map(|(tag, uuid)| (tag.to_string(), uuid))
    .collect();

    DeviceProfile::new(
        "Muse",
        MUSE_SERVICE,
        Characteristics::Channels(channels),
        DecoderKind::Muse,
    )
    .with_control(MUSE_CONTROL)
    .with_name_prefix("Muse")
    // halt, status, preset p21 (EEG + IMU), start streaming
    .with_start_sequence(muse_steps(&["h", "s", "p21", "d"]))
    .with_keep_alive(KeepAlive {
        command: None,
        interval: Duration::from_secs(10),
    })
}

pub fn muse_athena() -> DeviceProfile {
    DeviceProfile::new(
        "Muse S (Athena)",
        MUSE_SERVICE,
        Characteristics::Channels(vec![("sensors".to_string(), MUSE_ATHENA_SENSOR)]),
        DecoderKind::Athena,
    )
    .with_control(MUSE_CONTROL)
    .with_name_prefix("Muse")
    .with_start_sequence(muse_steps(&["h", "s", "p1035", "dc001"]))
    .with_keep_alive(KeepAlive {
        command: Some(encode_muse_command("s")),
        interval: Duration::from_secs(10),
    })
}

pub fn heart_rate() -> DeviceProfile {
    DeviceProfile::new(
        "Heart Rate",
        HEART_RATE_SERVICE,
        Characteristics::Single(HEART_RATE_MEASUREMENT),
        DecoderKind::HeartRate,
    )
}

/// Every built-in profile with its registry key.
pub fn all() -> Vec<(&'static str, DeviceProfile)> {
    vec![
        (GENERIC_UART, generic_uart()),
        (MUSE, muse()),
        (MUSE_ATHENA, muse_athena()),
        (HEART_RATE, heart_rate()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muse_command_framing() {
        assert_eq!(encode_muse_command("d"), vec![0x02, b'd', b'\n']);
        assert_eq!(encode_muse_command("p21"), vec![0x04, b'p', b'2', b'1', b'\n']);
    }

    #[test]
    fn muse_declares_six_channels_and_handshake() {
        let p = muse();
        assert_eq!(p.characteristics.entries().len(), 6);
        assert_eq!(p.characteristics.channel_of(MUSE_ACCEL), Some(Some("accel")));
        assert_eq!(p.start_sequence.len(), 4);
        assert_eq!(p.start_sequence[3].bytes, encode_muse_command("d"));
        assert!(p.keep_alive.as_ref().is_some_and(|k| k.command.is_none()));
    }

    #[test]
    fn heart_rate_profile_decodes_measurements() {
        let p = heart_rate();
        let payloads = p.decode(&[0x10, 72, 0x00, 0x04, 0x00, 0x04], None).into_payloads();
        assert_eq!(payloads.len(), 1);
    }
}
