// src/errors.rs
//! Error taxonomy for the key redemption system.
//!
//! Every fallible operation in the core returns [`KeyError`]. The variants
//! split into authoritative outcomes (`DuplicateKey`, `NotFound`,
//! `AlreadyRedeemed`, `BadSignature`, `Unauthorized`) and transient failures
//! (`StorageUnavailable`, `MirrorUnavailable`, `RoleGrantFailed`) that may be
//! retried. Mirror failures are never fatal to redemption.

use thiserror::Error;

/// Errors produced by the key store, integrity guard, mirror, and
/// redemption protocol.
#[derive(Debug, Error)]
pub enum KeyError {
    /// A key with the same identifier has already been issued.
    #[error("key already exists")]
    DuplicateKey,

    /// No key with the given identifier exists in the store.
    #[error("unknown key")]
    NotFound,

    /// The key exists but has already been consumed. Authoritative and
    /// final; callers must not retry.
    #[error("key has already been redeemed")]
    AlreadyRedeemed,

    /// The presented key fails HMAC verification. Reported without
    /// consulting the store, so it reveals nothing about key existence.
    #[error("invalid key signature")]
    BadSignature,

    /// The acting user is neither the owner nor an admin-role holder.
    #[error("not authorized")]
    Unauthorized,

    /// The local store could not complete the operation. Transient;
    /// retried internally with backoff before being surfaced.
    #[error("key storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The remote mirror could not be reached or returned an unexpected
    /// response. Transient and non-fatal: mirror sync is best-effort.
    #[error("mirror unavailable: {0}")]
    MirrorUnavailable(String),

    /// The external role-assignment API failed after a successful
    /// store-level redemption. The redemption is rolled back before this
    /// is surfaced, so the key remains redeemable.
    #[error("role assignment failed: {0}")]
    RoleGrantFailed(String),
}

impl KeyError {
    /// Whether the error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeyError::StorageUnavailable(_)
                | KeyError::MirrorUnavailable(_)
                | KeyError::RoleGrantFailed(_)
        )
    }
}

impl From<sqlx::Error> for KeyError {
    fn from(e: sqlx::Error) -> Self {
        KeyError::StorageUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(KeyError::StorageUnavailable("busy".into()).is_transient());
        assert!(KeyError::MirrorUnavailable("timeout".into()).is_transient());
        assert!(KeyError::RoleGrantFailed("502".into()).is_transient());

        assert!(!KeyError::AlreadyRedeemed.is_transient());
        assert!(!KeyError::NotFound.is_transient());
        assert!(!KeyError::BadSignature.is_transient());
        assert!(!KeyError::Unauthorized.is_transient());
        assert!(!KeyError::DuplicateKey.is_transient());
    }
}
