//! Athena (Muse S new firmware) mixed-stream segmentation.
//!
//! One notification multiplexes EEG and PPG sub-blocks without length or type
//! framing. After a fixed header the buffer is scanned position by position:
//!
//! | Sub-block | Size | Accepted when |
//! |---|---|---|
//! | EEG | 18 bytes (twelve 12-bit samples) | first sample within [`EEG_VALID_RANGE`] |
//! | PPG | 20 bytes (six 24-bit BE values + 2 status bytes) | first value is non-zero |
//!
//! Bytes matching neither are skipped one at a time. Channel names are
//! assigned by cycling through [`EEG_CHANNELS`] / [`PPG_CHANNELS`] as blocks
//! are consumed, and all blocks of one kind are merged into a single record.

use std::ops::RangeInclusive;

use relay_types::Payload;
use serde_json::{Map, Value, json};

use super::eeg;

pub const HEADER_LEN: usize = 9;
pub const EEG_BLOCK_LEN: usize = 18;
pub const PPG_BLOCK_LEN: usize = 20;

/// Raw 12-bit range a genuine EEG sub-block's first sample falls in.
pub const EEG_VALID_RANGE: RangeInclusive<u16> = 500..=3500;

pub const EEG_CHANNELS: [&str; 8] = ["tp9", "af7", "af8", "tp10", "fpz", "aux_r", "aux_l", "aux"];
pub const PPG_CHANNELS: [&str; 3] = ["ambient", "infrared", "red"];

const PPG_VALUES_PER_BLOCK: usize = 6;

/// Merged per-channel readings of one sensor kind within a packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSet<T> {
    /// Representative value per channel (the block's first sample).
    pub values: Vec<(&'static str, T)>,
    /// Every sample seen for the channel, in arrival order.
    pub samples: Vec<(&'static str, Vec<T>)>,
}

impl<T: Copy> ChannelSet<T> {
    fn merge(&mut self, channel: &'static str, block: Vec<T>) {
        let Some(&first) = block.first() else {
            return;
        };
        match self.values.iter_mut().find(|(name, _)| *name == channel) {
            Some(slot) => slot.1 = first,
            None => self.values.push((channel, first)),
        }
        match self.samples.iter_mut().find(|(name, _)| *name == channel) {
            Some(slot) => slot.1.extend(block),
            None => self.samples.push((channel, block)),
        }
    }

    pub fn value(&self, channel: &str) -> Option<T> {
        self.values
            .iter()
            .find(|(name, _)| *name == channel)
            .map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Copy + Into<Value>> ChannelSet<T> {
    fn to_record(&self, kind: &str) -> Value {
        let data: Map<String, Value> = self
            .values
            .iter()
            .map(|(name, v)| (name.to_string(), (*v).into()))
            .collect();
        let samples: Map<String, Value> = self
            .samples
            .iter()
            .map(|(name, s)| {
                let list: Vec<Value> = s.iter().map(|v| (*v).into()).collect();
                (name.to_string(), Value::Array(list))
            })
            .collect();
        json!({ "type": kind, "data": data, "samples": samples })
    }
}

/// Everything recovered from one Athena packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AthenaFrame {
    pub eeg: ChannelSet<i32>,
    pub ppg: ChannelSet<u32>,
    /// Bytes skipped because they matched no sub-block.
    pub skipped: usize,
}

impl AthenaFrame {
    /// Zero, one or two payloads: EEG first, then PPG.
    pub fn into_payloads(self) -> Vec<Payload> {
        let mut out = Vec::with_capacity(2);
        if !self.eeg.is_empty() {
            out.push(Payload::Record(self.eeg.to_record("eeg")));
        }
        if !self.ppg.is_empty() {
            out.push(Payload::Record(self.ppg.to_record("ppg")));
        }
        out
    }
}

/// Scan `bytes` for EEG and PPG sub-blocks.
pub fn segment(bytes: &[u8]) -> AthenaFrame {
    let mut frame = AthenaFrame::default();
    let mut eeg_cursor = 0usize;
    let mut ppg_cursor = 0usize;
    let mut pos = HEADER_LEN;

    while pos < bytes.len() {
        let rest = &bytes[pos..];

        if let Some(block) = rest.get(..EEG_BLOCK_LEN).filter(|b| looks_like_eeg(b)) {
            let samples = eeg::unpack_samples(block)
                .into_iter()
                .map(eeg::center)
                .collect();
            let channel = EEG_CHANNELS[eeg_cursor % EEG_CHANNELS.len()];
            frame.eeg.merge(channel, samples);
            eeg_cursor += 1;
            pos += EEG_BLOCK_LEN;
            continue;
        }

        if let Some(block) = rest.get(..PPG_BLOCK_LEN).filter(|b| looks_like_ppg(b)) {
            let channel = PPG_CHANNELS[ppg_cursor % PPG_CHANNELS.len()];
            frame.ppg.merge(channel, ppg_values(block));
            ppg_cursor += 1;
            pos += PPG_BLOCK_LEN;
            continue;
        }

        frame.skipped += 1;
        pos += 1;
    }

    if frame.skipped > 0 {
        tracing::trace!(skipped = frame.skipped, "athena: unrecognised bytes skipped");
    }
    frame
}

fn looks_like_eeg(block: &[u8]) -> bool {
    let (first, _) = eeg::unpack_block([block[0], block[1], block[2]]);
    EEG_VALID_RANGE.contains(&first)
}

fn looks_like_ppg(block: &[u8]) -> bool {
    read_u24_be(block) != 0
}

fn ppg_values(block: &[u8]) -> Vec<u32> {
    block
        .chunks_exact(3)
        .take(PPG_VALUES_PER_BLOCK)
        .map(read_u24_be)
        .collect()
}

fn read_u24_be(bytes: &[u8]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eeg_block(first: u16) -> Vec<u8> {
        let mut block = eeg::pack_block(first, 2048).to_vec();
        for _ in 0..5 {
            block.extend_from_slice(&eeg::pack_block(2048, 2048));
        }
        block
    }

    fn ppg_block(first: u32) -> Vec<u8> {
        let mut block = Vec::new();
        for v in [first, 2, 3, 4, 5, 6] {
            block.extend_from_slice(&v.to_be_bytes()[1..]);
        }
        block.extend_from_slice(&[0xEE, 0xEE]);
        block
    }

    fn header() -> Vec<u8> {
        vec![0u8; HEADER_LEN]
    }

    #[test]
    fn header_only_yields_nothing() {
        let frame = segment(&header());
        assert!(frame.into_payloads().is_empty());
        assert!(segment(&[1, 2, 3]).into_payloads().is_empty());
    }

    #[test]
    fn eeg_blocks_cycle_through_channels() {
        let mut packet = header();
        packet.extend(eeg_block(2148));
        packet.extend(eeg_block(1948));
        let frame = segment(&packet);
        assert_eq!(frame.eeg.value("tp9"), Some(100));
        assert_eq!(frame.eeg.value("af7"), Some(-100));
        assert_eq!(frame.eeg.value("af8"), None);
        assert_eq!(frame.eeg.samples[0].1.len(), 12);
        assert!(frame.ppg.is_empty());
        assert_eq!(frame.into_payloads().len(), 1);
    }

    #[test]
    fn mixed_packet_emits_eeg_then_ppg() {
        let mut packet = header();
        packet.extend(eeg_block(2048));
        packet.extend(ppg_block(0x0A0B0C));
        let payloads = segment(&packet).into_payloads();
        assert_eq!(payloads.len(), 2);
        let Payload::Record(eeg) = &payloads[0] else { panic!() };
        let Payload::Record(ppg) = &payloads[1] else { panic!() };
        assert_eq!(eeg["type"], "eeg");
        assert_eq!(eeg["data"]["tp9"], 0);
        assert_eq!(ppg["type"], "ppg");
        assert_eq!(ppg["data"]["ambient"], 0x0A0B0C);
        assert_eq!(ppg["samples"]["ambient"].as_array().map(Vec::len), Some(6));
    }

    #[test]
    fn out_of_band_sample_is_not_eeg() {
        // First sample 100 is below the tolerance band; with fewer than 20
        // bytes remaining it cannot be PPG either, so everything is skipped.
        let mut packet = header();
        packet.extend(eeg_block(100));
        let frame = segment(&packet);
        assert!(frame.eeg.is_empty());
        assert!(frame.ppg.is_empty());
        assert_eq!(frame.skipped, EEG_BLOCK_LEN);
    }

    #[test]
    fn band_edges_are_inclusive() {
        for (first, accepted) in [(499u16, false), (500, true), (3500, true), (3501, false)] {
            let mut packet = header();
            packet.extend(eeg_block(first));
            assert_eq!(!segment(&packet).eeg.is_empty(), accepted, "first sample {first}");
        }
    }

    #[test]
    fn junk_bytes_are_skipped_before_a_block() {
        // A single stray byte: too short for PPG, and its first "sample" is
        // outside the EEG band.
        let mut packet = header();
        packet.push(0x00);
        packet.extend(eeg_block(2048));
        let frame = segment(&packet);
        assert_eq!(frame.skipped, 1);
        assert_eq!(frame.eeg.value("tp9"), Some(0));
    }

    #[test]
    fn repeated_channel_overwrites_value_and_appends_samples() {
        let mut packet = header();
        for i in 0..9u16 {
            packet.extend(eeg_block(2048 + i));
        }
        let frame = segment(&packet);
        assert_eq!(frame.eeg.values.len(), 8);
        // Ninth block wraps to tp9.
        assert_eq!(frame.eeg.value("tp9"), Some(8));
        assert_eq!(frame.eeg.samples[0].1.len(), 24);
    }
}
