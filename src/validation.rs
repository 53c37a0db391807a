//! Argument validation for remote commands.
//!
//! Every check here runs before a command touches the device link, so a bad argument
//! fails with an [`InputError`] and no radio traffic.

use crate::meshtastic::{BROADCAST_ADDR, MAX_PAYLOAD_LEN};

/// Malformed or out-of-range command arguments, with messages shown to the chat user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("'{value}' is not a node id (expected !a1b2c3d4, a1b2c3d4 or ^all)")]
    InvalidNodeId { value: String },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("data is not a valid hex string: {reason}")]
    InvalidHex { reason: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is too long ({len} bytes, max {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("missing required option '{0}'")]
    MissingOption(String),

    #[error("option '{name}' has the wrong type (expected {expected})")]
    WrongType { name: String, expected: &'static str },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Parse a node id as typed by a user: `!a1b2c3d4`, bare hex (`a1b2`), `0x`-prefixed hex,
/// or `^all` for broadcast.
pub fn parse_node_id(value: &str) -> Result<u32, InputError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("^all") {
        return Ok(BROADCAST_ADDR);
    }
    let digits = trimmed
        .strip_prefix('!')
        .or_else(|| trimmed.strip_prefix("0x"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(InputError::InvalidNodeId {
            value: value.to_string(),
        });
    }
    u32::from_str_radix(digits, 16).map_err(|_| InputError::InvalidNodeId {
        value: value.to_string(),
    })
}

/// Decode a hex payload, ignoring ASCII whitespace between digits.
pub fn parse_hex_payload(value: &str) -> Result<Vec<u8>, InputError> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(InputError::Empty { field: "data" });
    }
    let bytes = hex::decode(&compact).map_err(|e| InputError::InvalidHex {
        reason: e.to_string(),
    })?;
    if bytes.len() > MAX_PAYLOAD_LEN {
        return Err(InputError::TooLong {
            field: "data",
            len: bytes.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(bytes)
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), InputError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(InputError::OutOfRange { field, min, max, value })
    }
}

pub fn validate_latitude(value: f64) -> Result<f64, InputError> {
    check_range("latitude", value, -90.0, 90.0).map(|_| value)
}

pub fn validate_longitude(value: f64) -> Result<f64, InputError> {
    check_range("longitude", value, -180.0, 180.0).map(|_| value)
}

pub fn validate_altitude(value: i64) -> Result<i32, InputError> {
    check_range("altitude", value as f64, -1000.0, 100_000.0).map(|_| value as i32)
}

/// Accepts the command's default of 10; the link clamps to the firmware maximum of 7.
pub fn validate_hop_limit(value: i64) -> Result<u32, InputError> {
    check_range("hoplimit", value as f64, 1.0, 10.0).map(|_| value as u32)
}

pub fn validate_channel_index(value: i64) -> Result<u32, InputError> {
    check_range("channel", value as f64, 0.0, 7.0).map(|_| value as u32)
}

pub fn validate_port(value: i64) -> Result<u32, InputError> {
    check_range("port", value as f64, 0.0, 511.0).map(|_| value as u32)
}

/// Text bound for the radio: non-empty after trimming and within one packet.
pub fn validate_mesh_text(value: &str) -> Result<String, InputError> {
    if value.trim().is_empty() {
        return Err(InputError::Empty { field: "message" });
    }
    if value.len() > MAX_PAYLOAD_LEN {
        return Err(InputError::TooLong {
            field: "message",
            len: value.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(value.to_string())
}
