//! Serial line → sensor payload.
//!
//! A frame is one newline-terminated line from the microcontroller:
//!
//! ```text
//! <{"temperature":21.5,"humidity":48.0}*AB>
//! {"temperature":21.5}
//! ```
//!
//! The angle brackets and the `*` checksum trailer are both optional. The
//! trailer is discarded without being verified.

use serde_json::{Map, Value};
use thiserror::Error;

/// Decoded JSON object, keyed by sensor type name. Keys are not validated
/// here; the store skips names it does not know.
pub type Payload = Map<String, Value>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line is not valid UTF-8: {raw:?}")]
    Undecodable { raw: Vec<u8> },

    #[error("payload is empty after stripping (line: {line:?})")]
    EmptyPayload { line: String },

    #[error("malformed payload {payload:?} (line: {line:?}): {reason}")]
    MalformedPayload {
        line: String,
        payload: String,
        reason: String,
    },
}

/// Turn raw line bytes into text, trimming surrounding whitespace and the
/// line terminator.
///
/// With `strict` unset, invalid sequences are replaced rather than rejected.
pub fn decode_line(raw: &[u8], strict: bool) -> Result<String, FrameError> {
    let text = if strict {
        std::str::from_utf8(raw)
            .map_err(|_| FrameError::Undecodable { raw: raw.to_vec() })?
            .to_owned()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };
    Ok(text.trim().to_owned())
}

/// Remove the `<...>` wrapper and the `*` checksum trailer.
///
/// A degenerate `<>` wrapper is left in place.
pub fn strip_frame(line: &str) -> &str {
    let mut body = line;
    if let Some(rest) = body.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            if end > 0 {
                body = &rest[..end];
            }
        }
    }
    match body.find('*') {
        Some(star) => &body[..star],
        None => body,
    }
}

pub fn parse_frame(line: &str) -> Result<Payload, FrameError> {
    let payload = strip_frame(line).trim();
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload {
            line: line.to_owned(),
        });
    }

    let malformed = |reason: String| FrameError::MalformedPayload {
        line: line.to_owned(),
        payload: payload.to_owned(),
        reason,
    };

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(malformed(format!("expected a JSON object, got {}", json_kind(&other)))),
        Err(e) => Err(malformed(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
