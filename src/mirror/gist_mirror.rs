// src/mirror/gist_mirror.rs
//! Gist-backed mirror of the key inventory.
//!
//! Keeps a human-inspectable JSON snapshot of the full key table in a
//! GitHub Gist, for recovery if local storage is lost and for out-of-band
//! distribution. The local store stays authoritative: the mirror is a
//! backup sink, consulted only at startup to restore rows that are missing
//! locally.
//!
//! # Failure policy
//! Every error here maps to `MirrorUnavailable`, which is transient and
//! non-fatal. Pushes run on spawned tasks with bounded retry and never
//! block a redemption.

use crate::errors::KeyError;
use crate::models::key::KeyRecord;
use crate::utils::serialization::{deserialize, serialize_pretty};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Name of the snapshot file inside the gist.
const SNAPSHOT_FILE: &str = "keys.json";

/// Base delay between push retries; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Full-inventory snapshot as stored in the gist.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeySnapshot {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,

    /// Every issued key with its redemption state
    pub keys: Vec<KeyRecord>,
}

impl KeySnapshot {
    /// Builds a snapshot of the given records, stamped now.
    pub fn new(keys: Vec<KeyRecord>) -> Self {
        KeySnapshot {
            generated_at: Utc::now(),
            keys,
        }
    }
}

/// Shape of the gist response we care about: `files.<name>.content`.
#[derive(Deserialize)]
struct GistResponse {
    files: std::collections::HashMap<String, GistFile>,
}

#[derive(Deserialize)]
struct GistFile {
    content: String,
}

/// Client for the remote gist holding the key snapshot.
#[derive(Clone)]
pub struct GistMirror {
    /// Shared HTTP client (connection pooling)
    http: reqwest::Client,

    /// API base, `https://api.github.com` outside of tests
    api_base: String,

    /// Identifier of the gist document
    gist_id: String,

    /// Access token; opaque, never logged
    token: String,
}

impl GistMirror {
    /// Creates a mirror client against the public GitHub API.
    ///
    /// # Arguments
    /// * `gist_id` - Identifier of the gist to mirror into
    /// * `token` - API token with gist scope
    pub fn new(gist_id: &str, token: &str) -> Self {
        Self::with_api_base("https://api.github.com", gist_id, token)
    }

    /// Creates a mirror client against an explicit API base URL.
    ///
    /// Tests point this at a local mock server.
    pub fn with_api_base(api_base: &str, gist_id: &str, token: &str) -> Self {
        GistMirror {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            gist_id: gist_id.to_string(),
            token: token.to_string(),
        }
    }

    fn gist_url(&self) -> String {
        format!("{}/gists/{}", self.api_base, self.gist_id)
    }

    /// Replaces the remote snapshot with the given one.
    ///
    /// A full-content replace, so the operation is idempotent and safe to
    /// retry: pushing the same snapshot twice leaves the gist identical.
    ///
    /// # Errors
    /// `MirrorUnavailable` on network failure or any non-success status.
    pub async fn push(&self, snapshot: &KeySnapshot) -> Result<(), KeyError> {
        let content = serialize_pretty(snapshot)
            .map_err(|e| KeyError::MirrorUnavailable(e.to_string()))?;
        let body = json!({
            "files": { SNAPSHOT_FILE: { "content": content } }
        });

        let response = self
            .http
            .patch(self.gist_url())
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "key-system")
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyError::MirrorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyError::MirrorUnavailable(format!(
                "gist update returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetches the remote snapshot for startup reconciliation.
    ///
    /// # Returns
    /// - `Ok(Some(snapshot))` if the gist holds a parseable snapshot file
    /// - `Ok(None)` if the gist exists but has no snapshot file yet
    ///
    /// # Errors
    /// `MirrorUnavailable` on network failure, non-success status, or a
    /// snapshot file that does not parse.
    pub async fn pull(&self) -> Result<Option<KeySnapshot>, KeyError> {
        let response = self
            .http
            .get(self.gist_url())
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "key-system")
            .send()
            .await
            .map_err(|e| KeyError::MirrorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyError::MirrorUnavailable(format!(
                "gist fetch returned {}",
                response.status()
            )));
        }

        let gist: GistResponse = response
            .json()
            .await
            .map_err(|e| KeyError::MirrorUnavailable(e.to_string()))?;

        match gist.files.get(SNAPSHOT_FILE) {
            Some(file) => {
                let snapshot = deserialize(&file.content)
                    .map_err(|e| KeyError::MirrorUnavailable(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Pushes with bounded exponential backoff.
    ///
    /// # Arguments
    /// * `snapshot` - Snapshot to push
    /// * `attempts` - Maximum attempts (at least one)
    ///
    /// # Errors
    /// The last `MirrorUnavailable` once attempts are exhausted.
    pub async fn push_with_retry(
        &self,
        snapshot: &KeySnapshot,
        attempts: u32,
    ) -> Result<(), KeyError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err = None;

        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self.push(snapshot).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("mirror push attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| KeyError::MirrorUnavailable("no attempts".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> KeySnapshot {
        KeySnapshot::new(vec![KeyRecord {
            key: "ABC123.tag".to_string(),
            role_id: 5,
            redeemed_by: Some(42),
            redeemed_at: Some(Utc::now()),
        }])
    }

    #[tokio::test]
    async fn test_push_patches_gist() {
        let mock = mockito::mock("PATCH", "/gists/push-ok")
            .match_header("authorization", "token secret")
            .match_header("user-agent", "key-system")
            .with_status(200)
            .with_body("{}")
            .create();

        let mirror = GistMirror::with_api_base(&mockito::server_url(), "push-ok", "secret");
        mirror.push(&sample_snapshot()).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_push_surfaces_server_error() {
        let _mock = mockito::mock("PATCH", "/gists/push-fail")
            .with_status(502)
            .create();

        let mirror = GistMirror::with_api_base(&mockito::server_url(), "push-fail", "secret");
        let err = mirror.push(&sample_snapshot()).await.unwrap_err();
        assert!(matches!(err, KeyError::MirrorUnavailable(_)));
    }

    #[tokio::test]
    async fn test_pull_roundtrips_snapshot() {
        let snapshot = sample_snapshot();
        let content = serialize_pretty(&snapshot).unwrap();
        let body = json!({
            "files": { "keys.json": { "content": content } }
        });

        let _mock = mockito::mock("GET", "/gists/pull-ok")
            .with_status(200)
            .with_body(body.to_string())
            .create();

        let mirror = GistMirror::with_api_base(&mockito::server_url(), "pull-ok", "secret");
        let pulled = mirror.pull().await.unwrap().unwrap();
        assert_eq!(pulled.keys, snapshot.keys);
    }

    #[tokio::test]
    async fn test_pull_without_snapshot_file() {
        let _mock = mockito::mock("GET", "/gists/pull-empty")
            .with_status(200)
            .with_body(r#"{"files": {}}"#)
            .create();

        let mirror = GistMirror::with_api_base(&mockito::server_url(), "pull-empty", "secret");
        assert!(mirror.pull().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_with_retry_exhausts_and_surfaces_last_error() {
        let mock = mockito::mock("PATCH", "/gists/retry")
            .with_status(500)
            .expect(2)
            .create();

        let mirror = GistMirror::with_api_base(&mockito::server_url(), "retry", "secret");
        let err = mirror
            .push_with_retry(&sample_snapshot(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::MirrorUnavailable(_)));
        mock.assert();
    }
}
