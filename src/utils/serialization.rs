// src/utils/serialization.rs
//! Serialization helpers for wire payloads and wallet records.
//!
//! Everything crossing the wallet or HTTP boundary is JSON. These helpers fold
//! serde failures into `CommonInvalidStructure` with the payload name attached,
//! so callers can tell which document was malformed.

use crate::errors::{AnoncredsError, AnoncredsResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value to a JSON string.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Errors
/// `InvalidState` if serialization fails; typed payloads always serialize, so a
/// failure here is an engine bug rather than bad input.
pub fn serialize<T: Serialize>(data: &T) -> AnoncredsResult<String> {
    serde_json::to_string(data)
        .map_err(|err| AnoncredsError::InvalidState(format!("cannot serialize payload: {}", err)))
}

/// Deserializes a value from a JSON string.
///
/// # Arguments
/// * `data` - JSON string to deserialize
/// * `what` - Payload name used in the error message
pub fn deserialize<T: DeserializeOwned>(data: &str, what: &str) -> AnoncredsResult<T> {
    serde_json::from_str(data)
        .map_err(|err| AnoncredsError::InvalidStructure(format!("cannot deserialize {}: {}", what, err)))
}

/// Converts a typed value into another type through its JSON form.
///
/// Used to reach into the wire form of opaque crypto values (e.g. the revealed
/// attributes inside a sub-proof) without depending on their Rust layout.
pub fn to_value<T: Serialize>(data: &T) -> AnoncredsResult<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|err| AnoncredsError::InvalidState(format!("cannot serialize payload: {}", err)))
}

/// Deep-copies a value by round-tripping through JSON.
///
/// The CL types only offer fallible `try_clone`; this gives the same for any
/// serde type, e.g. when a value has to move into a blocking task.
pub fn clone_via_json<T: Serialize + DeserializeOwned>(data: &T) -> AnoncredsResult<T> {
    let value = to_value(data)?;
    serde_json::from_value(value)
        .map_err(|err| AnoncredsError::InvalidState(format!("cannot copy payload: {}", err)))
}
