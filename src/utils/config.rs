// src/utils/config.rs
//! Process configuration, read once at startup.
//!
//! All externally-injected values (the signing secret, mirror credentials,
//! the admin role, the role-API endpoint) arrive through environment
//! variables and are loaded into one immutable [`Config`] that is passed
//! explicitly into each component's constructor. Secrets are opaque values
//! and must never be logged.
//!
//! ## Environment Variables
//! - `HMAC_SECRET`: Shared secret for key signing (required)
//! - `ADMIN_ROLE_ID`: Role id allowed to issue keys (required)
//! - `ROLE_API_URL`: Base URL of the role-assignment API (required)
//! - `ROLE_API_TOKEN`: Token for the role-assignment API (required)
//! - `OWNER_ID`: (Optional) user id that is always authorized
//! - `DATABASE_URL`: (Optional) SQLite URL, default `sqlite:keys.db`
//! - `GIST_ID` / `GIST_TOKEN`: (Optional) enable the gist mirror
//! - `BIND_ADDR`: (Optional) listen address, default `127.0.0.1:3000`

use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;

/// Immutable process-wide configuration.
pub struct Config {
    /// Shared HMAC secret; opaque, never logged
    pub hmac_secret: String,

    /// SQLite database URL for the authoritative key store
    pub database_url: String,

    /// Role id whose holders may issue and list keys
    pub admin_role_id: i64,

    /// User id that is always authorized, if configured
    pub owner_id: Option<i64>,

    /// Gist id and token for the mirror; both or neither
    pub gist: Option<(String, String)>,

    /// Base URL of the role-assignment API
    pub role_api_url: String,

    /// Token for the role-assignment API; opaque, never logged
    pub role_api_token: String,

    /// Address the HTTP command surface binds to
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    /// Returns an error naming the first missing or malformed variable.
    pub fn from_env() -> Result<Self> {
        let hmac_secret =
            env::var("HMAC_SECRET").map_err(|_| anyhow!("HMAC_SECRET must be set"))?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:keys.db".to_string());

        let admin_role_id = env::var("ADMIN_ROLE_ID")
            .map_err(|_| anyhow!("ADMIN_ROLE_ID must be set"))?
            .parse::<i64>()
            .context("ADMIN_ROLE_ID must be an integer role id")?;

        let owner_id = match env::var("OWNER_ID") {
            Ok(raw) => Some(raw.parse::<i64>().context("OWNER_ID must be an integer")?),
            Err(_) => None,
        };

        // The mirror is optional, but half a configuration is a mistake.
        let gist = match (env::var("GIST_ID"), env::var("GIST_TOKEN")) {
            (Ok(id), Ok(token)) => Some((id, token)),
            (Err(_), Err(_)) => None,
            _ => return Err(anyhow!("GIST_ID and GIST_TOKEN must be set together")),
        };

        let role_api_url =
            env::var("ROLE_API_URL").map_err(|_| anyhow!("ROLE_API_URL must be set"))?;
        let role_api_token =
            env::var("ROLE_API_TOKEN").map_err(|_| anyhow!("ROLE_API_TOKEN must be set"))?;

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address")?;

        Ok(Config {
            hmac_secret,
            database_url,
            admin_role_id,
            owner_id,
            gist,
            role_api_url,
            role_api_token,
            bind_addr,
        })
    }
}
