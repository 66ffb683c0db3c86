// src/utils/serialization.rs
//! Serialization utilities for the key system.
//!
//! Thin wrappers over serde_json used by the mirror snapshot format.

use serde::{Deserialize, Serialize};
use serde_json;

/// Serializes a value to pretty-printed JSON.
///
/// Used for the mirror snapshot, which is meant to be human-inspectable.
pub fn serialize_pretty<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(data)
}

/// Deserializes a value from a JSON string.
///
/// # Arguments
/// * `data` - JSON string to deserialize
///
/// # Returns
/// - `Ok(T)` with deserialized value on success
/// - `Err(serde_json::Error)` if deserialization fails
pub fn deserialize<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::key::KeyRecord;

    #[test]
    fn test_record_json_roundtrip() {
        let record = KeyRecord {
            key: "ABC123.tag".to_string(),
            role_id: 5,
            redeemed_by: None,
            redeemed_at: None,
        };

        let json = serialize_pretty(&record).unwrap();
        let back: KeyRecord = deserialize(&json).unwrap();
        assert_eq!(back, record);
    }
}
