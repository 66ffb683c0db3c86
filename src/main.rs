// src/main.rs

//! # Key Redemption System - Main Entry Point
//!
//! This binary wires together the components of the key system and starts
//! the HTTP command surface.
//!
//! ## Architecture Overview
//! 1. **Store Layer**: `KeyStore` over SQLite, the authoritative inventory
//! 2. **Integrity Layer**: `IntegrityGuard` binding keys to HMAC tags
//! 3. **Mirror Layer**: `GistMirror` keeping a best-effort remote backup
//! 4. **Services Layer**: Redemption protocol and the API endpoints
//!
//! ## Environment Variables Required
//! - `HMAC_SECRET`: Shared secret for key signing
//! - `ADMIN_ROLE_ID`: Role id allowed to issue keys
//! - `ROLE_API_URL` / `ROLE_API_TOKEN`: Role-assignment API
//! - `OWNER_ID`: (Optional) always-authorized user id
//! - `DATABASE_URL`: (Optional) SQLite URL (default: sqlite:keys.db)
//! - `GIST_ID` / `GIST_TOKEN`: (Optional) enable the gist mirror
//! - `BIND_ADDR`: (Optional) listen address (default: 127.0.0.1:3000)

use crate::integrity::guard::IntegrityGuard;
use crate::mirror::gist_mirror::GistMirror;
use crate::services::api_server::ApiServer;
use crate::services::redemption::{AdminPolicy, RedemptionService};
use crate::services::role_assigner::{HttpRoleAssigner, RoleAssigner};
use crate::store::key_store::KeyStore;
use crate::utils::config::Config;
use dotenv::dotenv;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod errors; // Domain error taxonomy
mod integrity; // HMAC signing and verification
mod mirror; // Remote snapshot backup
mod models; // Data structures
mod services; // Business logic and API
mod store; // Authoritative SQLite persistence
mod utils; // Configuration and helpers

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment configuration
/// 2. Open the key store (schema created if absent)
/// 3. Reconcile missing keys from the mirror, best-effort
/// 4. Start the API server
///
/// # Panics
/// - If required environment variables are missing
/// - If the key database cannot be opened
#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().expect("invalid configuration");

    // Authoritative local store; creates keys.db and its schema on first run
    let store = Arc::new(
        KeyStore::open(&config.database_url)
            .await
            .expect("Failed to open key store - check DATABASE_URL"),
    );

    let guard = Arc::new(IntegrityGuard::new(config.hmac_secret.as_bytes()));

    let roles: Arc<dyn RoleAssigner> = Arc::new(HttpRoleAssigner::new(
        &config.role_api_url,
        &config.role_api_token,
    ));

    let mirror = config
        .gist
        .as_ref()
        .map(|(id, token)| Arc::new(GistMirror::new(id, token)));

    let policy = AdminPolicy::new(config.owner_id, config.admin_role_id);

    let redemption = Arc::new(RedemptionService::new(
        Arc::clone(&store),
        guard,
        roles,
        mirror,
        policy,
    ));

    // Recover keys present in the mirror but missing locally. Best-effort:
    // a dead mirror must not stop the service from starting.
    match redemption.reconcile_from_mirror().await {
        Ok(0) => {}
        Ok(restored) => log::info!("startup reconciliation restored {} keys", restored),
        Err(e) => log::warn!("startup reconciliation skipped: {}", e),
    }

    let api_server = ApiServer::new(redemption);

    log::info!("API server running at http://{}", config.bind_addr);
    log::info!("Available endpoints:");
    log::info!("- POST /issue-key");
    log::info!("- POST /redeem-key");
    log::info!("- POST /lookup-key");
    log::info!("- POST /list-keys");
    log::info!("- POST /sync-mirror");

    api_server.run(config.bind_addr).await;
}
