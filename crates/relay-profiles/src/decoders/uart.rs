//! Generic UART text decoding.

use relay_types::Payload;

/// Decode one serial line (or NUS notification).
///
/// Whitespace is trimmed; an empty result is incomplete. Numeric text becomes
/// [`Payload::Scalar`], a JSON object becomes [`Payload::Record`], anything
/// else stays [`Payload::Text`].
pub fn decode_line(bytes: &[u8]) -> Option<Payload> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = trimmed.parse::<f64>() {
        if v.is_finite() {
            return Some(Payload::Scalar(v));
        }
    }

    if trimmed.starts_with('{') {
        if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return Some(Payload::Record(value));
        }
    }

    Some(Payload::Text(trimmed.to_string()))
}
