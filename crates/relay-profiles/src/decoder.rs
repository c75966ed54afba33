//! The [`Decoder`] seam between raw transport bytes and structured payloads.
//!
//! Every decoder is pure: same bytes and channel in, same [`Decoded`] out.
//! Malformed or short input is never an error; it yields
//! [`Decoded::Incomplete`] and the caller emits nothing.

use relay_types::Payload;
use serde::{Deserialize, Serialize};

use crate::decoders::{athena, eeg, heart_rate, imu, uart};

/// Outcome of decoding one raw buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Short, malformed, or empty input. Nothing is emitted.
    Incomplete,
    /// One or more payloads, in the order they should be emitted.
    Payloads(Vec<Payload>),
}

impl Decoded {
    pub fn one(payload: Payload) -> Self {
        Decoded::Payloads(vec![payload])
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Decoded::Incomplete)
    }

    /// Flatten into the list of payloads to emit (empty for `Incomplete`).
    pub fn into_payloads(self) -> Vec<Payload> {
        match self {
            Decoded::Incomplete => Vec::new(),
            Decoded::Payloads(p) => p,
        }
    }
}

impl From<Option<Payload>> for Decoded {
    fn from(value: Option<Payload>) -> Self {
        match value {
            Some(p) => Decoded::one(p),
            None => Decoded::Incomplete,
        }
    }
}

/// Turns the raw bytes of one notification (or serial line) into payloads.
///
/// Implementations must never panic on arbitrary input.
pub trait Decoder: Send + Sync + std::fmt::Debug {
    /// Decode `bytes` that arrived on `channel` (the profile's channel tag,
    /// `None` for single-characteristic profiles and serial lines).
    fn decode(&self, bytes: &[u8], channel: Option<&str>) -> Decoded;
}

/// Which inertial sensor an IMU packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImuAxis {
    Accel,
    Gyro,
}

impl ImuAxis {
    pub fn label(self) -> &'static str {
        match self {
            ImuAxis::Accel => "accel",
            ImuAxis::Gyro => "gyro",
        }
    }

    pub fn default_scale(self) -> f64 {
        match self {
            ImuAxis::Accel => imu::ACCEL_SCALE,
            ImuAxis::Gyro => imu::GYRO_SCALE,
        }
    }
}

/// Built-in decoder families, selectable by name from profile definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecoderKind {
    /// UTF-8 text lines: numbers become scalars, JSON objects records.
    Uart,
    /// 12-bit packed EEG (sequence index + two 3-byte blocks).
    Eeg,
    /// Big-endian int16 xyz triple multiplied by `scale`.
    Imu { axis: ImuAxis, scale: f64 },
    /// Classic Muse: routes `accel` / `gyro` channels to the IMU decoder,
    /// electrode channels (`tp9`, `af7`, ...) to the single-electrode EEG
    /// decoder and untagged packets to the four-channel EEG decoder.
    Muse,
    /// Athena multiplexed EEG/PPG stream.
    Athena,
    /// Standard BLE Heart Rate Measurement.
    HeartRate,
}

impl Decoder for DecoderKind {
    fn decode(&self, bytes: &[u8], channel: Option<&str>) -> Decoded {
        match self {
            DecoderKind::Uart => uart::decode_line(bytes).into(),
            DecoderKind::Eeg => eeg::decode_packet(bytes).map(|p| p.to_payload()).into(),
            DecoderKind::Imu { axis, scale } => imu::decode_packet(bytes, *scale)
                .map(|s| s.to_payload(*axis))
                .into(),
            DecoderKind::Muse => match channel {
                Some("accel") => imu::decode_packet(bytes, imu::ACCEL_SCALE)
                    .map(|s| s.to_payload(ImuAxis::Accel))
                    .into(),
                Some("gyro") => imu::decode_packet(bytes, imu::GYRO_SCALE)
                    .map(|s| s.to_payload(ImuAxis::Gyro))
                    .into(),
                Some(electrode) if eeg::EEG_CHANNELS.iter().any(|c| *c == electrode) => {
                    eeg::decode_electrode(bytes, electrode).map(|p| p.to_payload()).into()
                }
                _ => eeg::decode_packet(bytes).map(|p| p.to_payload()).into(),
            },
            DecoderKind::Athena => {
                let payloads = athena::segment(bytes).into_payloads();
                if payloads.is_empty() {
                    Decoded::Incomplete
                } else {
                    Decoded::Payloads(payloads)
                }
            }
            DecoderKind::HeartRate => heart_rate::decode(bytes).map(|hr| hr.to_payload()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_kind_deserializes_from_tagged_table() {
        let kind: DecoderKind =
            serde_json::from_str(r#"{"kind":"imu","axis":"gyro","scale":0.5}"#).unwrap();
        assert_eq!(
            kind,
            DecoderKind::Imu {
                axis: ImuAxis::Gyro,
                scale: 0.5
            }
        );
        let kind: DecoderKind = serde_json::from_str(r#"{"kind":"heart_rate"}"#).unwrap();
        assert_eq!(kind, DecoderKind::HeartRate);
    }

    #[test]
    fn muse_routes_imu_channels() {
        let packet = [0x00, 0x01, 0x00, 0x10, 0xFF, 0xF0, 0x00, 0x00];
        let decoded = DecoderKind::Muse.decode(&packet, Some("accel"));
        let payloads = decoded.into_payloads();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            Payload::Record(v) => {
                assert_eq!(v["type"], "imu");
                assert_eq!(v["data"]["accel"]["sequence"], 1);
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn muse_electrode_channel_names_the_electrode() {
        // sequence 3, then 2048 packed in every 12-bit slot
        let mut packet = vec![0x00, 0x03];
        for _ in 0..6 {
            packet.extend_from_slice(&[0x80, 0x08, 0x00]);
        }
        let payloads = DecoderKind::Muse.decode(&packet, Some("af7")).into_payloads();
        let Payload::Record(v) = &payloads[0] else {
            panic!("expected record");
        };
        assert_eq!(v["data"]["af7"].as_array().map(Vec::len), Some(12));
        assert!(v["data"].get("tp9").is_none());

        let untagged = DecoderKind::Muse.decode(&packet, None).into_payloads();
        let Payload::Record(v) = &untagged[0] else {
            panic!("expected record");
        };
        assert_eq!(v["data"]["tp9"], 0);
        assert_eq!(v["data"]["tp10"], 0);
    }

    #[test]
    fn every_kind_survives_empty_input() {
        let kinds = [
            DecoderKind::Uart,
            DecoderKind::Eeg,
            DecoderKind::Imu {
                axis: ImuAxis::Accel,
                scale: 1.0,
            },
            DecoderKind::Muse,
            DecoderKind::Athena,
            DecoderKind::HeartRate,
        ];
        for kind in kinds {
            assert!(kind.decode(&[], None).is_incomplete(), "{kind:?}");
        }
    }
}
