//! BLE Heart Rate Measurement characteristic (0x2A37).
//!
//! ```text
//! byte 0 : flags
//!   bit0 : heart-rate field is u16 LE (else u8)
//!   bit3 : energy-expended u16 LE present
//!   bit4 : RR intervals (u16 LE, 1/1024 s) fill the rest of the buffer
//! ```

use relay_types::Payload;
use serde_json::{Map, Value, json};

const FLAG_HR_U16: u8 = 0x01;
const FLAG_ENERGY: u8 = 0x08;
const FLAG_RR: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRate {
    pub flags: u8,
    pub bpm: u16,
    pub energy_expended: Option<u16>,
    pub rr_intervals: Option<Vec<u16>>,
}

impl HeartRate {
    /// Number of bytes the decoded fields occupy on the wire.
    pub fn encoded_len(&self) -> usize {
        let hr = if self.flags & FLAG_HR_U16 != 0 { 2 } else { 1 };
        let energy = if self.energy_expended.is_some() { 2 } else { 0 };
        let rr = self.rr_intervals.as_ref().map_or(0, |v| 2 * v.len());
        1 + hr + energy + rr
    }

    pub fn to_payload(&self) -> Payload {
        let mut record = Map::new();
        record.insert("type".into(), json!("heart_rate"));
        record.insert("bpm".into(), json!(self.bpm));
        if let Some(energy) = self.energy_expended {
            record.insert("energy_expended".into(), json!(energy));
        }
        if let Some(rr) = &self.rr_intervals {
            record.insert("rr_intervals".into(), json!(rr));
        }
        Payload::Record(Value::Object(record))
    }
}

pub fn decode(bytes: &[u8]) -> Option<HeartRate> {
    let (&flags, mut rest) = bytes.split_first()?;

    let bpm = if flags & FLAG_HR_U16 != 0 {
        let v = read_u16_le(rest)?;
        rest = &rest[2..];
        v
    } else {
        let (&v, tail) = rest.split_first()?;
        rest = tail;
        u16::from(v)
    };

    let energy_expended = if flags & FLAG_ENERGY != 0 {
        let v = read_u16_le(rest)?;
        rest = &rest[2..];
        Some(v)
    } else {
        None
    };

    let rr_intervals = (flags & FLAG_RR != 0).then(|| {
        rest.chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    });

    Some(HeartRate {
        flags,
        bpm,
        energy_expended,
        rr_intervals,
    })
}

fn read_u16_le(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [a, b, ..] => Some(u16::from_le_bytes([*a, *b])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_bpm_with_two_rr_intervals() {
        // flags 0x10, bpm 72, RR 800 and 1024
        let bytes = [0x10, 72, 0x20, 0x03, 0x00, 0x04];
        let hr = decode(&bytes).unwrap();
        assert_eq!(hr.bpm, 72);
        assert_eq!(hr.energy_expended, None);
        assert_eq!(hr.rr_intervals, Some(vec![800, 1024]));
        assert_eq!(hr.encoded_len(), bytes.len());
    }

    #[test]
    fn u16_bpm_and_energy() {
        let bytes = [0x09, 0x2C, 0x01, 0x10, 0x00];
        let hr = decode(&bytes).unwrap();
        assert_eq!(hr.bpm, 300);
        assert_eq!(hr.energy_expended, Some(16));
        assert_eq!(hr.rr_intervals, None);
    }

    #[test]
    fn layout_length_matches_for_every_flag_byte() {
        for flags in 0..=255u8 {
            let hr_len = if flags & FLAG_HR_U16 != 0 { 2 } else { 1 };
            let energy_len = if flags & FLAG_ENERGY != 0 { 2 } else { 0 };
            let rr_count = if flags & FLAG_RR != 0 { 3 } else { 0 };
            let expected = 1 + hr_len + energy_len + 2 * rr_count;

            let mut bytes = vec![flags];
            bytes.extend((1..expected).map(|i| i as u8));
            let hr = decode(&bytes).unwrap_or_else(|| panic!("flags {flags:#04x}"));
            assert_eq!(hr.encoded_len(), expected, "flags {flags:#04x}");
            assert_eq!(
                hr.rr_intervals.as_ref().map(Vec::len).unwrap_or(0),
                rr_count
            );

            // Anything shorter than the fixed fields is incomplete.
            let fixed = 1 + hr_len + energy_len;
            for len in 0..fixed {
                assert_eq!(decode(&bytes[..len]), None, "flags {flags:#04x} len {len}");
            }
        }
    }

    #[test]
    fn odd_trailing_rr_byte_is_ignored() {
        let hr = decode(&[0x10, 60, 0x00, 0x04, 0x7F]).unwrap();
        assert_eq!(hr.rr_intervals, Some(vec![1024]));
    }

    #[test]
    fn rr_flag_without_values_yields_empty_list() {
        let hr = decode(&[0x10, 60]).unwrap();
        assert_eq!(hr.rr_intervals, Some(vec![]));
    }

    #[test]
    fn payload_omits_absent_fields() {
        let Payload::Record(v) = decode(&[0x00, 55]).unwrap().to_payload() else {
            panic!("expected record");
        };
        assert_eq!(v["type"], "heart_rate");
        assert_eq!(v["bpm"], 55);
        assert!(v.get("energy_expended").is_none());
        assert!(v.get("rr_intervals").is_none());
    }
}
