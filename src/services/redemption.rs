// src/services/redemption.rs
//! Redemption protocol: the orchestration around a key's life.
//!
//! Ties the integrity guard, the key store, the role-assignment API, and
//! the mirror together:
//!
//! 1. A redemption attempt is signature-checked before the store is ever
//!    consulted, so forged keys learn nothing about the inventory.
//! 2. The store performs the atomic check-and-set; `NotFound` and
//!    `AlreadyRedeemed` are authoritative and final.
//! 3. The role grant runs last. If it fails, the store redemption is
//!    rolled back so the key stays usable and the user sees a consistent
//!    "try again" rather than a consumed key without its role.
//! 4. After any successful mutation a mirror push is scheduled on a
//!    separate task; mirror trouble never fails the user's command.
//!
//! Issuance is gated on the admin policy: only the configured owner or
//! holders of the admin role may mint keys. Redemption is open to anyone
//! holding a validly signed key.

use crate::errors::KeyError;
use crate::integrity::guard::IntegrityGuard;
use crate::mirror::gist_mirror::{GistMirror, KeySnapshot};
use crate::models::actor::Actor;
use crate::models::key::KeyRecord;
use crate::services::role_assigner::RoleAssigner;
use crate::store::key_store::KeyStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Attempts for the store check-and-set on transient storage errors.
const STORE_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between store retries; doubles per attempt.
const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Attempts for a scheduled mirror push.
const MIRROR_PUSH_ATTEMPTS: u32 = 3;

/// Re-mint attempts on a key-body collision (vanishingly rare).
const MINT_ATTEMPTS: u32 = 3;

/// Who may issue and list keys.
///
/// The owner id, when configured, is always authorized; otherwise the
/// actor must hold the admin role.
pub struct AdminPolicy {
    owner_id: Option<i64>,
    admin_role_id: i64,
}

impl AdminPolicy {
    /// Creates a policy from the configured owner and admin role.
    pub fn new(owner_id: Option<i64>, admin_role_id: i64) -> Self {
        AdminPolicy {
            owner_id,
            admin_role_id,
        }
    }

    /// Whether the actor may perform admin operations.
    pub fn is_admin(&self, actor: &Actor) -> bool {
        if self.owner_id == Some(actor.id) {
            return true;
        }
        actor.has_role(self.admin_role_id)
    }
}

/// Orchestrates issuance and redemption over the component services.
pub struct RedemptionService {
    /// Authoritative key inventory
    store: Arc<KeyStore>,

    /// HMAC signer/verifier for key material
    guard: Arc<IntegrityGuard>,

    /// External role-assignment API
    roles: Arc<dyn RoleAssigner>,

    /// Optional gist mirror; `None` disables sync entirely
    mirror: Option<Arc<GistMirror>>,

    /// Issuance authorization policy
    policy: AdminPolicy,
}

impl RedemptionService {
    /// Creates the service from its collaborators.
    ///
    /// # Arguments
    /// * `store` - Opened key store
    /// * `guard` - Integrity guard holding the signing secret
    /// * `roles` - Role-assignment client (trait object for testability)
    /// * `mirror` - Mirror client, if configured
    /// * `policy` - Admin authorization policy
    pub fn new(
        store: Arc<KeyStore>,
        guard: Arc<IntegrityGuard>,
        roles: Arc<dyn RoleAssigner>,
        mirror: Option<Arc<GistMirror>>,
        policy: AdminPolicy,
    ) -> Self {
        RedemptionService {
            store,
            guard,
            roles,
            mirror,
            policy,
        }
    }

    /// Mints and stores a new key granting `role_id`.
    ///
    /// # Arguments
    /// * `actor` - The requesting user; must satisfy the admin policy
    /// * `role_id` - Role the new key will grant on redemption
    ///
    /// # Returns
    /// The full signed key string, to be handed to its future redeemer.
    ///
    /// # Errors
    /// - `Unauthorized` if the actor is neither owner nor admin
    /// - `StorageUnavailable` if the insert fails
    pub async fn issue(&self, actor: &Actor, role_id: i64) -> Result<String, KeyError> {
        if !self.policy.is_admin(actor) {
            return Err(KeyError::Unauthorized);
        }

        let mut last_err = KeyError::DuplicateKey;
        for _ in 0..MINT_ATTEMPTS {
            let key = self.guard.mint();
            match self.store.issue(&key, role_id).await {
                Ok(()) => {
                    log::info!("issued key for role {} by actor {}", role_id, actor.id);
                    self.schedule_mirror_push();
                    return Ok(key);
                }
                // Body collision: mint again with a fresh body.
                Err(KeyError::DuplicateKey) => last_err = KeyError::DuplicateKey,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Redeems a key for a user, granting its role.
    ///
    /// # Arguments
    /// * `user_id` - The redeeming user
    /// * `key` - The key string as presented
    ///
    /// # Returns
    /// The granted `role_id`.
    ///
    /// # Errors
    /// - `BadSignature` if the HMAC check fails; the store is not touched
    /// - `NotFound` / `AlreadyRedeemed` from the store, final
    /// - `RoleGrantFailed` if the external grant fails; the store-level
    ///   redemption has been rolled back
    /// - `StorageUnavailable` once internal retries are exhausted
    pub async fn redeem(&self, user_id: i64, key: &str) -> Result<i64, KeyError> {
        // Signature check precedes any store access.
        if !self.guard.verify_key(key) {
            return Err(KeyError::BadSignature);
        }

        let role_id = self.redeem_with_retry(key, user_id).await?;

        if let Err(grant_err) = self.roles.assign_role(user_id, role_id).await {
            log::warn!(
                "role grant failed for user {} after redemption, rolling back: {}",
                user_id,
                grant_err
            );
            if let Err(rollback_err) = self.store.unredeem(key).await {
                // The store says redeemed but the role was never granted.
                // Keep the inconsistency loud; an operator must intervene.
                log::error!(
                    "rollback after failed grant also failed, key left consumed: {}",
                    rollback_err
                );
            }
            return Err(grant_err);
        }

        log::info!("user {} redeemed a key for role {}", user_id, role_id);
        self.schedule_mirror_push();
        Ok(role_id)
    }

    /// Runs the store check-and-set, retrying transient failures only.
    ///
    /// `NotFound` and `AlreadyRedeemed` are never retried: those results
    /// are authoritative.
    async fn redeem_with_retry(&self, key: &str, user_id: i64) -> Result<i64, KeyError> {
        let mut delay = STORE_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match self.store.redeem(key, user_id, Utc::now()).await {
                Err(KeyError::StorageUnavailable(reason)) => {
                    attempt += 1;
                    if attempt >= STORE_RETRY_ATTEMPTS {
                        return Err(KeyError::StorageUnavailable(reason));
                    }
                    log::warn!("store busy during redemption (attempt {}): {}", attempt, reason);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }

    /// Fetches a key record. Admin-gated; read-only.
    pub async fn lookup(&self, actor: &Actor, key: &str) -> Result<Option<KeyRecord>, KeyError> {
        if !self.policy.is_admin(actor) {
            return Err(KeyError::Unauthorized);
        }
        self.store.lookup(key).await
    }

    /// Returns the full inventory. Admin-gated.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<KeyRecord>, KeyError> {
        if !self.policy.is_admin(actor) {
            return Err(KeyError::Unauthorized);
        }
        self.store.all_keys().await
    }

    /// Pushes a snapshot to the mirror immediately. Admin-gated.
    ///
    /// # Errors
    /// `MirrorUnavailable` if no mirror is configured or the push fails.
    pub async fn sync_mirror(&self, actor: &Actor) -> Result<(), KeyError> {
        if !self.policy.is_admin(actor) {
            return Err(KeyError::Unauthorized);
        }
        let mirror = self
            .mirror
            .as_ref()
            .ok_or_else(|| KeyError::MirrorUnavailable("no mirror configured".into()))?;

        let snapshot = KeySnapshot::new(self.store.all_keys().await?);
        mirror.push_with_retry(&snapshot, MIRROR_PUSH_ATTEMPTS).await
    }

    /// Startup reconciliation: restore keys the mirror has but the local
    /// store is missing.
    ///
    /// The local store stays authoritative; existing rows are never
    /// touched. With no mirror configured this is a no-op.
    ///
    /// # Returns
    /// Number of keys restored from the mirror.
    pub async fn reconcile_from_mirror(&self) -> Result<usize, KeyError> {
        let mirror = match &self.mirror {
            Some(m) => m,
            None => return Ok(0),
        };

        let snapshot = match mirror.pull().await? {
            Some(s) => s,
            None => return Ok(0),
        };

        let restored = self.store.restore_missing(&snapshot.keys).await?;
        if restored > 0 {
            log::info!("restored {} keys from the mirror snapshot", restored);
        }
        Ok(restored)
    }

    /// Schedules a best-effort mirror push on its own task.
    ///
    /// Runs entirely off the caller's path and takes no store locks beyond
    /// its own snapshot read. Failures are logged and dropped.
    fn schedule_mirror_push(&self) {
        let mirror = match &self.mirror {
            Some(m) => Arc::clone(m),
            None => return,
        };
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let keys = match store.all_keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    log::warn!("mirror snapshot read failed: {}", e);
                    return;
                }
            };
            let snapshot = KeySnapshot::new(keys);
            if let Err(e) = mirror.push_with_retry(&snapshot, MIRROR_PUSH_ATTEMPTS).await {
                log::warn!("mirror push abandoned: {}", e);
            }
        });
    }
}
