//! Bearer-token cache for the transcription service
//!
//! Process-wide: tokens are per-credential-pair, not per-call. The cache
//! holds one token, reuses it until shortly before expiry, and is
//! invalidated by the stream layer when the upstream answers 401.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use voxbridge_foundation::SttCredentials;

use crate::types::SttError;

/// Refuse to reuse a token this close to its expiry (seconds).
const EXPIRY_SLACK_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
struct AuthResponse {
    access_token: String,
    expire_at: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expire_at: u64,
}

#[derive(Default)]
pub struct TokenCache {
    token: Mutex<Option<CachedToken>>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache instance.
    pub fn global() -> &'static TokenCache {
        static CACHE: OnceLock<TokenCache> = OnceLock::new();
        CACHE.get_or_init(TokenCache::new)
    }

    /// Return a bearer token, fetching a fresh one when the cached token
    /// is missing or about to expire.
    pub async fn bearer(
        &self,
        client: &reqwest::Client,
        creds: &SttCredentials,
    ) -> Result<String, SttError> {
        if let Some(cached) = self.token.lock().clone() {
            if cached.expire_at > now_unix() + EXPIRY_SLACK_SECS {
                debug!("reusing cached transcription token");
                return Ok(cached.access_token);
            }
        }
        self.refresh(client, creds).await
    }

    /// Fetch a fresh token unconditionally, replacing the cached one.
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        creds: &SttCredentials,
    ) -> Result<String, SttError> {
        let response = client
            .post(&creds.auth_url)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SttError::Auth(format!("{status}: {body}")));
        }

        let auth: AuthResponse = response.json().await?;
        info!(expire_at = auth.expire_at, "transcription token refreshed");

        *self.token.lock() = Some(CachedToken {
            access_token: auth.access_token.clone(),
            expire_at: auth.expire_at,
        });
        Ok(auth.access_token)
    }

    /// Drop the cached token so the next caller re-authenticates.
    pub fn invalidate(&self) {
        *self.token.lock() = None;
    }

    #[cfg(test)]
    fn seed(&self, token: &str, expire_at: u64) {
        *self.token.lock() = Some(CachedToken {
            access_token: token.to_string(),
            expire_at,
        });
    }

    #[cfg(test)]
    fn cached(&self) -> Option<String> {
        self.token.lock().as_ref().map(|t| t.access_token.clone())
    }
}
