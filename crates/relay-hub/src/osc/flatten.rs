//! Decompose a structured payload into one OSC message per leaf value.

use relay_types::{Payload, sanitize_connection_id};
use rosc::{OscMessage, OscType};
use serde_json::{Map, Value};

/// Flatten `payload` of connection `connection_id` under `base`.
///
/// At the root of a record the `type` discriminator becomes a path segment
/// for the keys beside it and is never emitted itself. A `data` object is
/// unwrapped in place at any depth. Objects extend the address; everything
/// else is a leaf, and an array leaf is one message with one argument per
/// element.
///
/// ```
/// use relay_hub::osc::flatten;
/// use relay_types::Payload;
/// use serde_json::json;
///
/// let payload = Payload::Record(json!({"type": "eeg", "data": {"tp9": 1, "af7": 2}}));
/// let addrs: Vec<String> = flatten("/serial", "device 1", &payload)
///     .into_iter()
///     .map(|m| m.addr)
///     .collect();
/// assert_eq!(addrs, ["/serial/device_1/tp9", "/serial/device_1/af7"]);
/// ```
pub fn flatten(base: &str, connection_id: &str, payload: &Payload) -> Vec<OscMessage> {
    let root = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        sanitize_connection_id(connection_id)
    );
    let mut out = Vec::new();

    match payload {
        Payload::Scalar(v) => out.push(message(root, vec![OscType::Float(*v as f32)])),
        Payload::Text(s) => out.push(message(root, vec![OscType::String(s.clone())])),
        Payload::Record(Value::Object(map)) => flatten_root(&root, map, &mut out),
        Payload::Record(other) => walk(root, other, &mut out),
    }
    out
}

fn flatten_root(root: &str, map: &Map<String, Value>, out: &mut Vec<OscMessage>) {
    let prefix = match map.get("type").and_then(Value::as_str) {
        Some(kind) => format!("{root}/{}", sanitize_segment(kind)),
        None => root.to_string(),
    };

    for (key, value) in map {
        match (key.as_str(), value) {
            ("type", Value::String(_)) => {}
            ("data", Value::Object(data)) => {
                for (k, v) in data {
                    walk(format!("{root}/{}", sanitize_segment(k)), v, out);
                }
            }
            _ => walk(format!("{prefix}/{}", sanitize_segment(key)), value, out),
        }
    }
}

fn walk(path: String, value: &Value, out: &mut Vec<OscMessage>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "data" && child.is_object() {
                    walk(path.clone(), child, out);
                } else {
                    walk(format!("{path}/{}", sanitize_segment(key)), child, out);
                }
            }
        }
        Value::Array(items) => out.push(message(path, items.iter().map(to_arg).collect())),
        leaf => out.push(message(path, vec![to_arg(leaf)])),
    }
}

fn message(addr: String, args: Vec<OscType>) -> OscMessage {
    OscMessage { addr, args }
}

/// OSC address segments may not contain spaces or pattern characters.
fn sanitize_segment(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            ' ' | '#' | '*' | ',' | '/' | '?' | '[' | ']' | '{' | '}' => '_',
            c => c,
        })
        .collect()
}

/// Map a JSON value onto the narrowest OSC argument type.
pub(crate) fn to_arg(value: &Value) -> OscType {
    match value {
        Value::Null => OscType::Nil,
        Value::Bool(b) => OscType::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => OscType::Int(small),
                    Err(_) => OscType::Long(i),
                }
            } else if let Some(u) = n.as_u64() {
                OscType::Long(i64::try_from(u).unwrap_or(i64::MAX))
            } else {
                OscType::Float(n.as_f64().unwrap_or_default() as f32)
            }
        }
        Value::String(s) => OscType::String(s.clone()),
        nested => OscType::String(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addrs(msgs: &[OscMessage]) -> Vec<&str> {
        msgs.iter().map(|m| m.addr.as_str()).collect()
    }

    #[test]
    fn eeg_record_for_spaced_id() {
        let payload = Payload::Record(json!({"type": "eeg", "data": {"tp9": 1, "af7": 2}}));
        let msgs = flatten("/serial", "device 1", &payload);
        assert_eq!(addrs(&msgs), ["/serial/device_1/tp9", "/serial/device_1/af7"]);
        assert_eq!(msgs[0].args, vec![OscType::Int(1)]);
        assert_eq!(msgs[1].args, vec![OscType::Int(2)]);
    }

    #[test]
    fn root_siblings_go_under_type_segment() {
        let payload = Payload::Record(json!({
            "type": "eeg",
            "sequence": 7,
            "data": {"tp9": -3}
        }));
        let msgs = flatten("/serial", "m", &payload);
        assert_eq!(addrs(&msgs), ["/serial/m/eeg/sequence", "/serial/m/tp9"]);
    }

    #[test]
    fn nested_objects_extend_path_and_arrays_are_one_message() {
        let payload = Payload::Record(json!({
            "type": "heart_rate",
            "bpm": 72,
            "rr_intervals": [800, 810],
            "samples": {"tp9": {"data": {"first": 1.5}}}
        }));
        let msgs = flatten("/serial/", "hr", &payload);
        assert_eq!(
            addrs(&msgs),
            [
                "/serial/hr/heart_rate/bpm",
                "/serial/hr/heart_rate/rr_intervals",
                "/serial/hr/heart_rate/samples/tp9/first",
            ]
        );
        assert_eq!(msgs[1].args, vec![OscType::Int(800), OscType::Int(810)]);
        assert_eq!(msgs[2].args, vec![OscType::Float(1.5)]);
    }

    #[test]
    fn muse_sensor_streams_flatten_to_distinct_addresses() {
        use relay_profiles::{Decoder, DecoderKind};
        use std::collections::HashSet;

        let imu = [0x00, 0x05, 0x00, 0x10, 0xFF, 0xF0, 0x40, 0x00];
        let mut eeg = vec![0x00, 0x05];
        for _ in 0..4 {
            eeg.extend_from_slice(&[0x80, 0x08, 0x00]);
        }
        let addresses = |bytes: &[u8], channel: &str| -> HashSet<String> {
            DecoderKind::Muse
                .decode(bytes, Some(channel))
                .into_payloads()
                .iter()
                .flat_map(|p| flatten("/serial", "muse", p))
                .map(|m| m.addr)
                .collect()
        };

        let accel = addresses(&imu, "accel");
        let gyro = addresses(&imu, "gyro");
        assert!(accel.contains("/serial/muse/accel/x"));
        assert!(accel.contains("/serial/muse/accel/sequence"));
        assert!(gyro.contains("/serial/muse/gyro/z"));
        assert!(accel.is_disjoint(&gyro), "{accel:?} / {gyro:?}");

        let tp9 = addresses(&eeg, "tp9");
        let af7 = addresses(&eeg, "af7");
        assert!(tp9.contains("/serial/muse/tp9"));
        assert!(af7.contains("/serial/muse/af7"));
        assert!(!af7.contains("/serial/muse/tp9"));
    }

    #[test]
    fn record_without_type() {
        let payload = Payload::Record(json!({"temp": 21.5, "ok": true}));
        let msgs = flatten("/serial", "esp32", &payload);
        assert_eq!(addrs(&msgs), ["/serial/esp32/temp", "/serial/esp32/ok"]);
        assert_eq!(msgs[1].args, vec![OscType::Bool(true)]);
    }

    #[test]
    fn scalar_and_text_go_to_connection_root() {
        let msgs = flatten("/serial", "a-b", &Payload::Scalar(2.5));
        assert_eq!(addrs(&msgs), ["/serial/a_b"]);
        assert_eq!(msgs[0].args, vec![OscType::Float(2.5)]);

        let msgs = flatten("/serial", "a", &Payload::Text("hi".into()));
        assert_eq!(msgs[0].args, vec![OscType::String("hi".into())]);
    }

    #[test]
    fn wide_integers_become_longs() {
        assert_eq!(to_arg(&json!(5_000_000_000_i64)), OscType::Long(5_000_000_000));
        assert_eq!(to_arg(&json!(null)), OscType::Nil);
    }
}
