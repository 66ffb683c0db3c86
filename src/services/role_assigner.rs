// src/services/role_assigner.rs
//! Role-assignment API client.
//!
//! Granting the role is the one step of redemption that leaves this
//! process: the chat platform owns role membership. The seam is a trait so
//! the redemption protocol can be tested against a double, with an
//! HTTP-backed implementation for production.

use crate::errors::KeyError;
use async_trait::async_trait;

/// Grants a role to a user on the external platform.
///
/// Implementations must be idempotent: granting a role the user already
/// holds is a success, which makes retries after transient failures safe.
#[async_trait]
pub trait RoleAssigner: Send + Sync {
    /// Grants `role_id` to `user_id`.
    ///
    /// # Errors
    /// `RoleGrantFailed` on any transport or API failure; the caller
    /// decides whether to retry or roll back.
    async fn assign_role(&self, user_id: i64, role_id: i64) -> Result<(), KeyError>;
}

/// Role assigner backed by the platform's REST API.
#[derive(Clone)]
pub struct HttpRoleAssigner {
    /// Shared HTTP client (connection pooling)
    http: reqwest::Client,

    /// API base URL from process configuration
    api_base: String,

    /// Bearer token; opaque, never logged
    token: String,
}

impl HttpRoleAssigner {
    /// Creates a client against the configured role-assignment API.
    ///
    /// # Arguments
    /// * `api_base` - Base URL of the API
    /// * `token` - Bearer token for authentication
    pub fn new(api_base: &str, token: &str) -> Self {
        HttpRoleAssigner {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl RoleAssigner for HttpRoleAssigner {
    async fn assign_role(&self, user_id: i64, role_id: i64) -> Result<(), KeyError> {
        let url = format!("{}/members/{}/roles/{}", self.api_base, user_id, role_id);

        let response = self
            .http
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "key-system")
            .send()
            .await
            .map_err(|e| KeyError::RoleGrantFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyError::RoleGrantFailed(format!(
                "role API returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assign_role_puts_membership() {
        let mock = mockito::mock("PUT", "/members/42/roles/5")
            .match_header("authorization", "Bearer role-token")
            .with_status(204)
            .create();

        let assigner = HttpRoleAssigner::new(&mockito::server_url(), "role-token");
        assigner.assign_role(42, 5).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_assign_role_surfaces_api_failure() {
        let _mock = mockito::mock("PUT", "/members/42/roles/6")
            .with_status(503)
            .create();

        let assigner = HttpRoleAssigner::new(&mockito::server_url(), "role-token");
        let err = assigner.assign_role(42, 6).await.unwrap_err();
        assert!(matches!(err, KeyError::RoleGrantFailed(_)));
    }
}
