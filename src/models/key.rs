// src/models/key.rs
//! Key record data model.
//!
//! Defines the core structure for issued credential keys with support for
//! JSON serialization (mirror snapshots) and direct mapping from the
//! SQLite `keys` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single-use credential key as stored in the `keys` table.
///
/// Represents one issuable credential: the opaque key string, the role it
/// grants, and its redemption state.
///
/// # Fields
/// - `key`: Opaque unique identifier, immutable after creation
/// - `role_id`: Role granted on redemption, set at issuance
/// - `redeemed_by`: Redeeming user id, null until redeemed
/// - `redeemed_at`: Redemption timestamp, null until redeemed
///
/// # Invariant
/// `redeemed_by` and `redeemed_at` are either both null or both set; the
/// transition from unredeemed to redeemed happens exactly once and is
/// terminal. Rows are never deleted, only soft-consumed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct KeyRecord {
    /// Opaque key string in `BODY.TAG` form
    /// Example: "X7K2M9QPLA4RT0WB.hJ2kR8vN1mTqYw3z5cD6pA"
    pub key: String,

    /// Identifier of the role granted on redemption
    pub role_id: i64,

    /// Identifier of the redeeming user, if any
    pub redeemed_by: Option<i64>,

    /// When the key was redeemed (stored as RFC 3339 text)
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Whether this key has been consumed.
    pub fn is_redeemed(&self) -> bool {
        self.redeemed_by.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redeemed_state() {
        let mut record = KeyRecord {
            key: "ABC123.tag".to_string(),
            role_id: 5,
            redeemed_by: None,
            redeemed_at: None,
        };
        assert!(!record.is_redeemed());

        record.redeemed_by = Some(42);
        record.redeemed_at = Some(Utc::now());
        assert!(record.is_redeemed());
    }
}
