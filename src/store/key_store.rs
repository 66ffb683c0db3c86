// src/store/key_store.rs
//! Durable key inventory backed by SQLite.
//!
//! The `keys` table is the authoritative record of every issued key, the
//! role it grants, and its redemption state. The store owns its own schema
//! initialization (create-if-absent on open), so it is self-contained and
//! testable without any deployment tooling.
//!
//! # Concurrency
//! The pool holds a single connection, so every mutation is serialized
//! (single logical writer). Exactly-once redemption does not depend on
//! that: the check-and-set in [`KeyStore::redeem`] is one guarded `UPDATE`,
//! which SQLite applies atomically regardless of pool size.

use crate::errors::KeyError;
use crate::models::key::KeyRecord;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Schema for the authoritative key table. `redeemed_at` is RFC 3339 text.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS keys (
    key         TEXT    PRIMARY KEY,
    role_id     INTEGER,
    redeemed_by INTEGER,
    redeemed_at TEXT
)";

/// SQLite-backed store for issued keys.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct KeyStore {
    /// Single-connection pool over the SQLite database
    pool: SqlitePool,
}

impl KeyStore {
    /// Opens (or creates) the key database and ensures the schema exists.
    ///
    /// # Arguments
    /// * `database_url` - SQLite URL, e.g. `sqlite:keys.db` or
    ///   `sqlite::memory:` for tests
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the database cannot be opened or
    /// the schema cannot be created.
    pub async fn open(database_url: &str) -> Result<Self, KeyError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // One connection: serializes writers and keeps in-memory databases
        // visible across operations.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(KeyStore { pool })
    }

    /// Inserts a newly issued key.
    ///
    /// # Arguments
    /// * `key` - Full key string (primary key, immutable)
    /// * `role_id` - Role granted when the key is redeemed
    ///
    /// # Errors
    /// - `DuplicateKey` if a key with the same identifier already exists;
    ///   the stored record is left unchanged
    /// - `StorageUnavailable` on any other database failure
    pub async fn issue(&self, key: &str, role_id: i64) -> Result<(), KeyError> {
        let result = sqlx::query("INSERT INTO keys (key, role_id) VALUES (?1, ?2)")
            .bind(key)
            .bind(role_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(KeyError::DuplicateKey)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically redeems a key for a user.
    ///
    /// The check that the key is unredeemed and the write of the redemption
    /// fields happen in one guarded `UPDATE`, so two concurrent redemptions
    /// of the same key cannot both succeed.
    ///
    /// # Arguments
    /// * `key` - Full key string to redeem
    /// * `redeemer_id` - User consuming the key
    /// * `now` - Redemption timestamp recorded alongside the user
    ///
    /// # Returns
    /// The `role_id` the key grants.
    ///
    /// # Errors
    /// - `NotFound` if no such key exists (no row is created)
    /// - `AlreadyRedeemed` if the key was consumed earlier; authoritative
    ///   and final
    /// - `StorageUnavailable` on database failure
    pub async fn redeem(
        &self,
        key: &str,
        redeemer_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, KeyError> {
        let row = sqlx::query(
            "UPDATE keys SET redeemed_by = ?1, redeemed_at = ?2
             WHERE key = ?3 AND redeemed_by IS NULL
             RETURNING role_id",
        )
        .bind(redeemer_id)
        .bind(now)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.get::<i64, _>(0)),
            // The guarded update matched nothing: distinguish a missing key
            // from one that lost the race or was consumed earlier.
            None => match self.lookup(key).await? {
                Some(_) => Err(KeyError::AlreadyRedeemed),
                None => Err(KeyError::NotFound),
            },
        }
    }

    /// Fetches a single key record, if present. Read-only.
    pub async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>, KeyError> {
        let record = sqlx::query_as::<_, KeyRecord>(
            "SELECT key, role_id, redeemed_by, redeemed_at FROM keys WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Returns the full key inventory, ordered by key.
    ///
    /// Used for admin listing and for building mirror snapshots.
    pub async fn all_keys(&self) -> Result<Vec<KeyRecord>, KeyError> {
        let records = sqlx::query_as::<_, KeyRecord>(
            "SELECT key, role_id, redeemed_by, redeemed_at FROM keys ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Reverts a redemption, clearing both redemption fields together.
    ///
    /// Only the redemption protocol's rollback path calls this, after the
    /// external role grant fails. The key becomes redeemable again.
    pub async fn unredeem(&self, key: &str) -> Result<(), KeyError> {
        sqlx::query("UPDATE keys SET redeemed_by = NULL, redeemed_at = NULL WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts any records not already present locally.
    ///
    /// Used by startup reconciliation from the mirror. Existing rows are
    /// never modified: the local store stays authoritative for redemption
    /// state.
    ///
    /// # Returns
    /// Number of records restored.
    pub async fn restore_missing(&self, records: &[KeyRecord]) -> Result<usize, KeyError> {
        let mut restored = 0;
        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO keys (key, role_id, redeemed_by, redeemed_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&record.key)
            .bind(record.role_id)
            .bind(record.redeemed_by)
            .bind(record.redeemed_at)
            .execute(&self.pool)
            .await?;
            restored += result.rows_affected() as usize;
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_test_store() -> KeyStore {
        KeyStore::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_issue_and_lookup() {
        let store = open_test_store().await;
        store.issue("ABC123", 5).await.unwrap();

        let record = store.lookup("ABC123").await.unwrap().unwrap();
        assert_eq!(record.key, "ABC123");
        assert_eq!(record.role_id, 5);
        assert!(!record.is_redeemed());
    }

    #[tokio::test]
    async fn test_issue_duplicate_leaves_record_unchanged() {
        let store = open_test_store().await;
        store.issue("ABC123", 5).await.unwrap();

        let err = store.issue("ABC123", 99).await.unwrap_err();
        assert!(matches!(err, KeyError::DuplicateKey));

        // Original role assignment survives the failed insert.
        let record = store.lookup("ABC123").await.unwrap().unwrap();
        assert_eq!(record.role_id, 5);
    }

    #[tokio::test]
    async fn test_redeem_happy_path() {
        let store = open_test_store().await;
        store.issue("ABC123", 5).await.unwrap();

        let now = Utc::now();
        let role_id = store.redeem("ABC123", 42, now).await.unwrap();
        assert_eq!(role_id, 5);

        let record = store.lookup("ABC123").await.unwrap().unwrap();
        assert_eq!(record.redeemed_by, Some(42));
        assert!(record.redeemed_at.is_some());
    }

    #[tokio::test]
    async fn test_second_redemption_is_rejected() {
        let store = open_test_store().await;
        store.issue("ABC123", 5).await.unwrap();
        store.redeem("ABC123", 42, Utc::now()).await.unwrap();

        let err = store.redeem("ABC123", 99, Utc::now()).await.unwrap_err();
        assert!(matches!(err, KeyError::AlreadyRedeemed));

        // Winner's state is untouched by the losing attempt.
        let record = store.lookup("ABC123").await.unwrap().unwrap();
        assert_eq!(record.redeemed_by, Some(42));
    }

    #[tokio::test]
    async fn test_redeem_unknown_key_creates_nothing() {
        let store = open_test_store().await;

        let err = store.redeem("ZZZ", 42, Utc::now()).await.unwrap_err();
        assert!(matches!(err, KeyError::NotFound));
        assert!(store.lookup("ZZZ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_exactly_one_wins() {
        let store = open_test_store().await;
        store.issue("RACE01", 7).await.unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let t1 = tokio::spawn(async move { s1.redeem("RACE01", 1, Utc::now()).await });
        let t2 = tokio::spawn(async move { s2.redeem("RACE01", 2, Utc::now()).await });

        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        let winners = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one racer must win: {:?} / {:?}", r1, r2);

        let loser = if r1.is_ok() { r2 } else { r1 };
        assert!(matches!(loser, Err(KeyError::AlreadyRedeemed)));

        let record = store.lookup("RACE01").await.unwrap().unwrap();
        let winner_id = record.redeemed_by.unwrap();
        assert!(winner_id == 1 || winner_id == 2);
    }

    #[tokio::test]
    async fn test_unredeem_restores_both_fields() {
        let store = open_test_store().await;
        store.issue("ABC123", 5).await.unwrap();
        store.redeem("ABC123", 42, Utc::now()).await.unwrap();

        store.unredeem("ABC123").await.unwrap();
        let record = store.lookup("ABC123").await.unwrap().unwrap();
        assert_eq!(record.redeemed_by, None);
        assert_eq!(record.redeemed_at, None);

        // Redeemable again after rollback.
        store.redeem("ABC123", 99, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_missing_never_overwrites() {
        let store = open_test_store().await;
        store.issue("LOCAL1", 5).await.unwrap();
        store.redeem("LOCAL1", 42, Utc::now()).await.unwrap();

        let snapshot = vec![
            // Present locally, stale remote copy claims it is unredeemed.
            KeyRecord {
                key: "LOCAL1".to_string(),
                role_id: 5,
                redeemed_by: None,
                redeemed_at: None,
            },
            // Missing locally: should be restored.
            KeyRecord {
                key: "REMOTE1".to_string(),
                role_id: 9,
                redeemed_by: None,
                redeemed_at: None,
            },
        ];

        let restored = store.restore_missing(&snapshot).await.unwrap();
        assert_eq!(restored, 1);

        // Local redemption state is authoritative.
        let local = store.lookup("LOCAL1").await.unwrap().unwrap();
        assert_eq!(local.redeemed_by, Some(42));

        let remote = store.lookup("REMOTE1").await.unwrap().unwrap();
        assert_eq!(remote.role_id, 9);
    }

    #[tokio::test]
    async fn test_all_keys_snapshot() {
        let store = open_test_store().await;
        store.issue("BBB", 2).await.unwrap();
        store.issue("AAA", 1).await.unwrap();

        let keys = store.all_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key, "AAA");
        assert_eq!(keys[1].key, "BBB");
    }
}
