//! Accelerometer / gyroscope packets.
//!
//! 2-byte big-endian sequence index followed by three signed 16-bit
//! big-endian values (x, y, z), scaled by a sensor-specific constant.
//!
//! Both sensors emit an `imu` record keyed by sensor, so accelerometer and
//! gyroscope readings never share an address once flattened:
//!
//! ```text
//! {"type": "imu", "data": {"accel": {"sequence": 7, "x": .., "y": .., "z": ..}}}
//! ```

use relay_types::Payload;
use serde_json::json;

use crate::decoder::ImuAxis;

/// Accelerometer scale, g per LSB.
pub const ACCEL_SCALE: f64 = 0.0000610352;

/// Gyroscope scale, degrees/s per LSB.
pub const GYRO_SCALE: f64 = 0.0074768;

pub const MIN_PACKET_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub sequence: u16,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ImuSample {
    pub fn to_payload(&self, axis: ImuAxis) -> Payload {
        Payload::Record(json!({
            "type": "imu",
            "data": {
                axis.label(): { "sequence": self.sequence, "x": self.x, "y": self.y, "z": self.z },
            },
        }))
    }
}

pub fn decode_packet(bytes: &[u8], scale: f64) -> Option<ImuSample> {
    if bytes.len() < MIN_PACKET_LEN {
        return None;
    }
    let sequence = u16::from_be_bytes([bytes[0], bytes[1]]);
    let axis = |i: usize| f64::from(i16::from_be_bytes([bytes[i], bytes[i + 1]])) * scale;
    Some(ImuSample {
        sequence,
        x: axis(2),
        y: axis(4),
        z: axis(6),
    })
}
