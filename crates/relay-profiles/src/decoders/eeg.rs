//! 12-bit packed EEG (classic Muse wire format).
//!
//! ```text
//! bytes 0..2   : big-endian packet sequence index
//! bytes 2..    : 3-byte blocks, each holding two 12-bit samples
//!
//! block [b0, b1, b2]:
//!   sample1 = (b0 << 4) | (b1 >> 4)
//!   sample2 = ((b1 & 0x0F) << 8) | b2
//! ```
//!
//! Samples are centred on the 12-bit midpoint (2048).
//!
//! A packet from one electrode characteristic holds consecutive samples of
//! that electrode only and decodes through [`decode_electrode`]; an untagged
//! packet is read as one sample per channel of [`EEG_CHANNELS`].

use relay_types::Payload;
use serde_json::{Map, Value, json};

/// 12-bit ADC midpoint subtracted from every sample.
pub const EEG_CENTER: i32 = 2048;

/// Shortest packet accepted by [`decode_packet`].
pub const MIN_PACKET_LEN: usize = 10;

/// Channels produced from the first two blocks of a packet, in order.
pub const EEG_CHANNELS: [&str; 4] = ["tp9", "af7", "af8", "tp10"];

/// Split one 3-byte block into its two raw 12-bit samples.
pub fn unpack_block(block: [u8; 3]) -> (u16, u16) {
    let [b0, b1, b2] = block.map(u16::from);
    let sample1 = (b0 << 4) | (b1 >> 4);
    let sample2 = ((b1 & 0x0F) << 8) | b2;
    (sample1, sample2)
}

/// Inverse of [`unpack_block`]. Only the low 12 bits of each sample are used.
pub fn pack_block(sample1: u16, sample2: u16) -> [u8; 3] {
    let s1 = sample1 & 0x0FFF;
    let s2 = sample2 & 0x0FFF;
    [
        (s1 >> 4) as u8,
        (((s1 & 0x0F) << 4) | (s2 >> 8)) as u8,
        (s2 & 0xFF) as u8,
    ]
}

/// Unpack every complete 3-byte block in `bytes`; a trailing partial block is
/// ignored.
pub fn unpack_samples(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(3)
        .flat_map(|c| {
            let (a, b) = unpack_block([c[0], c[1], c[2]]);
            [a, b]
        })
        .collect()
}

/// Centre a raw 12-bit sample on zero.
pub fn center(sample: u16) -> i32 {
    i32::from(sample) - EEG_CENTER
}

/// One decoded EEG notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EegPacket {
    pub sequence: u16,
    /// Centred value per channel, in [`EEG_CHANNELS`] order.
    pub channels: Vec<(&'static str, i32)>,
}

impl EegPacket {
    pub fn value(&self, channel: &str) -> Option<i32> {
        self.channels
            .iter()
            .find(|(name, _)| *name == channel)
            .map(|(_, v)| *v)
    }

    pub fn to_payload(&self) -> Payload {
        let data: Map<String, Value> = self
            .channels
            .iter()
            .map(|(name, v)| (name.to_string(), json!(v)))
            .collect();
        Payload::Record(json!({
            "type": "eeg",
            "sequence": self.sequence,
            "data": data,
        }))
    }
}

/// Consecutive samples of a single electrode.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodePacket {
    pub sequence: u16,
    pub electrode: String,
    /// Centred samples, oldest first.
    pub samples: Vec<i32>,
}

impl ElectrodePacket {
    pub fn to_payload(&self) -> Payload {
        let mut data = Map::new();
        data.insert(self.electrode.clone(), json!(self.samples));
        Payload::Record(json!({
            "type": "eeg",
            "sequence": self.sequence,
            "data": data,
        }))
    }
}

/// Decode a packet that arrived on the characteristic of `electrode`.
pub fn decode_electrode(bytes: &[u8], electrode: &str) -> Option<ElectrodePacket> {
    if bytes.len() < MIN_PACKET_LEN {
        return None;
    }
    let sequence = u16::from_be_bytes([bytes[0], bytes[1]]);
    let samples = unpack_samples(&bytes[2..]).into_iter().map(center).collect();
    Some(ElectrodePacket {
        sequence,
        electrode: electrode.to_string(),
        samples,
    })
}

/// Decode a packet of at least [`MIN_PACKET_LEN`] bytes.
pub fn decode_packet(bytes: &[u8]) -> Option<EegPacket> {
    if bytes.len() < MIN_PACKET_LEN {
        return None;
    }
    let sequence = u16::from_be_bytes([bytes[0], bytes[1]]);
    let samples = unpack_samples(&bytes[2..8]);
    let channels = EEG_CHANNELS
        .iter()
        .zip(samples)
        .map(|(name, raw)| (*name, center(raw)))
        .collect();
    Some(EegPacket { sequence, channels })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trip_for_all_first_bytes() {
        // Sweep b0 and b2 fully, b1 across both nibbles.
        for b0 in 0..=255u8 {
            for b1 in [0x00u8, 0x0F, 0x5A, 0xA5, 0xF0, 0xFF] {
                for b2 in [0x00u8, 0x01, 0x7F, 0x80, 0xFF] {
                    let (s1, s2) = unpack_block([b0, b1, b2]);
                    assert!(s1 <= 0x0FFF && s2 <= 0x0FFF);
                    assert_eq!(pack_block(s1, s2), [b0, b1, b2]);
                }
            }
        }
    }

    #[test]
    fn midpoint_packets_centre_to_zero() {
        // Sequence 0x0800 followed by two blocks that each pack 2048, 2048.
        let block = pack_block(2048, 2048);
        assert_eq!(block, [0x80, 0x08, 0x00]);
        let mut packet = vec![0x08, 0x00];
        packet.extend_from_slice(&block);
        packet.extend_from_slice(&block);
        packet.extend_from_slice(&[0x00, 0x00]);

        let decoded = decode_packet(&packet).expect("10-byte packet decodes");
        assert_eq!(decoded.sequence, 0x0800);
        assert_eq!(decoded.channels.len(), 4);
        for name in EEG_CHANNELS {
            assert_eq!(decoded.value(name), Some(0), "{name}");
        }
    }

    #[test]
    fn nine_byte_buffer_is_incomplete() {
        let packet = [0x08, 0x00, 0x00, 0x08, 0x08, 0x00, 0x00, 0x08, 0x08];
        assert_eq!(decode_packet(&packet), None);
    }

    #[test]
    fn extremes_centre_to_bounds() {
        let mut packet = vec![0x00, 0x01];
        packet.extend_from_slice(&pack_block(0, 4095));
        packet.extend_from_slice(&pack_block(4095, 0));
        packet.extend_from_slice(&[0, 0]);
        let decoded = decode_packet(&packet).unwrap();
        assert_eq!(decoded.value("tp9"), Some(-2048));
        assert_eq!(decoded.value("af7"), Some(2047));
        assert_eq!(decoded.value("af8"), Some(2047));
        assert_eq!(decoded.value("tp10"), Some(-2048));
    }

    #[test]
    fn payload_record_shape() {
        let mut packet = vec![0x00, 0x07];
        packet.extend_from_slice(&pack_block(2048, 2049));
        packet.extend_from_slice(&pack_block(2050, 2051));
        packet.extend_from_slice(&[0, 0]);
        let Payload::Record(v) = decode_packet(&packet).unwrap().to_payload() else {
            panic!("expected record");
        };
        assert_eq!(v["type"], "eeg");
        assert_eq!(v["sequence"], 7);
        assert_eq!(v["data"]["tp9"], 0);
        assert_eq!(v["data"]["tp10"], 3);
    }

    #[test]
    fn electrode_packet_keeps_every_sample_under_its_own_channel() {
        let mut packet = vec![0x00, 0x09];
        packet.extend_from_slice(&pack_block(2048, 2049));
        packet.extend_from_slice(&pack_block(2047, 2148));
        packet.extend_from_slice(&pack_block(1948, 2048));

        let decoded = decode_electrode(&packet, "af7").expect("decodes");
        assert_eq!(decoded.samples, vec![0, 1, -1, 100, -100, 0]);

        let Payload::Record(v) = decoded.to_payload() else {
            panic!("expected record");
        };
        assert_eq!(v["type"], "eeg");
        assert_eq!(v["sequence"], 9);
        assert_eq!(v["data"]["af7"], json!([0, 1, -1, 100, -100, 0]));
        assert!(v["data"].get("tp9").is_none());
        assert_eq!(decode_electrode(&packet[..9], "af7"), None);
    }

    #[test]
    fn unpack_samples_ignores_partial_block() {
        let mut bytes = pack_block(1, 2).to_vec();
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        assert_eq!(unpack_samples(&bytes), vec![1, 2]);
    }
}
