// src/services/api_server.rs
//! HTTP command surface for the key system.
//!
//! Stands in for the chat-platform command interface: each endpoint
//! carries the acting user's id and role membership, and dispatches to the
//! redemption protocol. The API is built using Axum and includes endpoints
//! for:
//! - Key issuance (admin-gated)
//! - Key redemption
//! - Inventory lookup and listing (admin-gated)
//! - Forcing a mirror sync (admin-gated)
//!
//! Error responses map the domain taxonomy to distinct, non-leaking
//! messages: a bad signature reveals nothing about whether the key exists,
//! and transient failures surface as a generic "try again later".

use crate::errors::KeyError;
use crate::models::actor::Actor;
use crate::services::redemption::RedemptionService;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

// API request and response structures

/// Request payload for issuing a new key
#[derive(Serialize, Deserialize)]
struct IssueKeyRequest {
    actor: Actor,
    role_id: i64,
}

/// Request payload for redeeming a key
#[derive(Serialize, Deserialize)]
struct RedeemKeyRequest {
    user_id: i64,
    key: String,
}

/// Request payload for looking up a single key
#[derive(Serialize, Deserialize)]
struct LookupKeyRequest {
    actor: Actor,
    key: String,
}

/// Request payload for listing the inventory
#[derive(Serialize, Deserialize)]
struct ListKeysRequest {
    actor: Actor,
}

/// Request payload for forcing a mirror sync
#[derive(Serialize, Deserialize)]
struct SyncMirrorRequest {
    actor: Actor,
}

/// API server state containing the redemption protocol
#[derive(Clone)]
pub struct ApiServer {
    /// Orchestration service for all key operations
    redemption: Arc<RedemptionService>,
}

/// Maps a domain error to a status code and user-facing message.
///
/// Messages are deliberately terse and non-leaking: the bad-signature
/// message does not say whether the key exists, and transient errors all
/// collapse to "try again later" with no internal detail.
fn error_response(err: &KeyError) -> (StatusCode, Json<serde_json::Value>) {
    let (status, message) = match err {
        KeyError::DuplicateKey => (StatusCode::CONFLICT, "Key already exists"),
        KeyError::NotFound => (StatusCode::NOT_FOUND, "Unknown key"),
        KeyError::AlreadyRedeemed => (StatusCode::CONFLICT, "This key has already been used"),
        KeyError::BadSignature => (StatusCode::UNPROCESSABLE_ENTITY, "That key is not valid"),
        KeyError::Unauthorized => (StatusCode::FORBIDDEN, "Not authorized"),
        KeyError::StorageUnavailable(_)
        | KeyError::MirrorUnavailable(_)
        | KeyError::RoleGrantFailed(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Temporary problem, try again later",
        ),
    };
    (status, Json(json!({ "error": message })))
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `redemption` - Orchestration service handling all key operations
    pub fn new(redemption: Arc<RedemptionService>) -> Self {
        ApiServer { redemption }
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) {
        // Configure all API routes
        let app = Router::new()
            .route("/issue-key", post(Self::issue_key_handler))
            .route("/redeem-key", post(Self::redeem_key_handler))
            .route("/lookup-key", post(Self::lookup_key_handler))
            .route("/list-keys", post(Self::list_keys_handler))
            .route("/sync-mirror", post(Self::sync_mirror_handler))
            .with_state(Arc::new(self.clone()));

        // Create TCP listener
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

        // Start serving requests
        axum::serve(listener, app).await.unwrap();
    }

    /// Issues a new key granting a role
    ///
    /// # Endpoint
    /// POST /issue-key
    ///
    /// # Responses
    /// - 200 OK: Returns the freshly minted key
    /// - 403 Forbidden: Actor is not owner or admin
    /// - 503 Service Unavailable: Storage failure
    async fn issue_key_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<IssueKeyRequest>,
    ) -> impl IntoResponse {
        match state.redemption.issue(&payload.actor, payload.role_id).await {
            Ok(key) => (StatusCode::OK, Json(json!({ "key": key }))),
            Err(e) => error_response(&e),
        }
    }

    /// Redeems a key for the calling user
    ///
    /// # Endpoint
    /// POST /redeem-key
    ///
    /// # Responses
    /// - 200 OK: Returns the granted role id
    /// - 404 Not Found: Unknown key
    /// - 409 Conflict: Key already used
    /// - 422 Unprocessable Entity: Signature check failed
    /// - 503 Service Unavailable: Storage or role-grant failure (no
    ///   redemption side effect remains)
    async fn redeem_key_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<RedeemKeyRequest>,
    ) -> impl IntoResponse {
        match state.redemption.redeem(payload.user_id, &payload.key).await {
            Ok(role_id) => (StatusCode::OK, Json(json!({ "role_id": role_id }))),
            Err(e) => error_response(&e),
        }
    }

    /// Looks up a single key record
    ///
    /// # Endpoint
    /// POST /lookup-key
    ///
    /// # Responses
    /// - 200 OK: Returns the record, or null if absent
    /// - 403 Forbidden: Actor is not owner or admin
    async fn lookup_key_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<LookupKeyRequest>,
    ) -> impl IntoResponse {
        match state.redemption.lookup(&payload.actor, &payload.key).await {
            Ok(record) => (StatusCode::OK, Json(json!({ "record": record }))),
            Err(e) => error_response(&e),
        }
    }

    /// Lists the full key inventory
    ///
    /// # Endpoint
    /// POST /list-keys
    ///
    /// # Responses
    /// - 200 OK: Returns every issued key with redemption state
    /// - 403 Forbidden: Actor is not owner or admin
    async fn list_keys_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<ListKeysRequest>,
    ) -> impl IntoResponse {
        match state.redemption.list(&payload.actor).await {
            Ok(keys) => (StatusCode::OK, Json(json!({ "keys": keys }))),
            Err(e) => error_response(&e),
        }
    }

    /// Pushes a fresh snapshot to the mirror immediately
    ///
    /// # Endpoint
    /// POST /sync-mirror
    ///
    /// # Responses
    /// - 200 OK: Snapshot pushed
    /// - 403 Forbidden: Actor is not owner or admin
    /// - 503 Service Unavailable: Mirror unreachable or not configured
    async fn sync_mirror_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<SyncMirrorRequest>,
    ) -> impl IntoResponse {
        match state.redemption.sync_mirror(&payload.actor).await {
            Ok(()) => (StatusCode::OK, Json(json!({ "synced": true }))),
            Err(e) => error_response(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_is_distinct_and_non_leaking() {
        let (not_found, _) = error_response(&KeyError::NotFound);
        let (used, _) = error_response(&KeyError::AlreadyRedeemed);
        let (bad_sig, _) = error_response(&KeyError::BadSignature);
        let (unauthorized, _) = error_response(&KeyError::Unauthorized);

        assert_eq!(not_found, StatusCode::NOT_FOUND);
        assert_eq!(used, StatusCode::CONFLICT);
        assert_eq!(bad_sig, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unauthorized, StatusCode::FORBIDDEN);

        // Every transient error collapses to the same retryable answer.
        let (storage, storage_body) = error_response(&KeyError::StorageUnavailable("disk".into()));
        let (grant, grant_body) = error_response(&KeyError::RoleGrantFailed("502".into()));
        assert_eq!(storage, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(grant, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(storage_body.0, grant_body.0);
        // Internal detail never reaches the body.
        assert!(!storage_body.0.to_string().contains("disk"));
    }
}
