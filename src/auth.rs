//! Access-token acquisition with a persistent local cache.
//!
//! [`TokenBroker::acquire`] is the only entry point:
//!
//! 1. Load the cache record; if it is still valid, return it without
//!    touching the network.
//! 2. Otherwise mint a fresh client assertion and POST it to the token
//!    endpoint (client-credentials grant, JWT-bearer assertion).
//! 3. Persist the new token (with the cache's safety margin) and return it.
//!
//! The exchange is attempted exactly once per call. Any failure there is an
//! `AbmError::Auth`; the page-retry policy does not apply to it.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::assertion::build_assertion;
use crate::cache::TokenCache;
use crate::config::{Config, Identity};
use crate::error::{AbmError, Result};

/// Fixed `client_assertion_type` for the JWT-bearer grant.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Overall timeout for the token exchange. The endpoint answers quickly;
/// a slow answer means something is wrong.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Form body sent to the token endpoint.
/// Serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_assertion_type: &'a str,
    client_assertion: &'a str,
    scope: &'a str,
}

/// Subset of the token response that we need.
///
/// Both fields are optional at the serde level so that a response missing
/// one of them is reported as a protocol error with context, not as a
/// bare deserialization failure.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The bearer token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Declared lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Usually `"Bearer"`.
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Hands out a valid bearer token, from cache when possible.
pub struct TokenBroker {
    client: Client,
    token_url: String,
    scope: String,
    identity: Identity,
    cache: TokenCache,
}

impl TokenBroker {
    /// Builds a broker for the configured mode, token endpoint, and cache path.
    pub fn new(config: &Config, identity: Identity) -> Result<Self> {
        let client = Client::builder().timeout(TOKEN_REQUEST_TIMEOUT).build()?;
        Ok(TokenBroker {
            client,
            token_url: config.token_url.clone(),
            scope: config.mode.scope(),
            identity,
            cache: TokenCache::new(config.cache_path.clone()),
        })
    }

    /// The cache this broker reads and writes.
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Returns a bearer token that is valid right now.
    ///
    /// Zero network calls when the cache holds a valid record; exactly one
    /// token request plus one cache write otherwise.
    ///
    /// # Errors
    ///
    /// - `AbmError::Assertion` — the assertion could not be signed.
    /// - `AbmError::Auth` — the exchange failed or returned an incomplete body.
    /// - `AbmError::CacheWrite` — the new token could not be persisted.
    pub async fn acquire(&self) -> Result<String> {
        match self.cache.load() {
            Some(cached) if cached.is_valid() => {
                match cached.expires_at_local() {
                    Some(at) => tracing::info!(expires_at = %at, "using cached token"),
                    None => tracing::info!("using cached token"),
                }
                return Ok(cached.token);
            }
            Some(_) => tracing::info!("cached token expired, requesting a new one"),
            None => tracing::info!("no cached token, requesting a new one"),
        }

        let assertion = build_assertion(&self.identity)?;
        let (access_token, expires_in) = self.exchange(&assertion).await?;
        self.cache.store(&access_token, expires_in)?;

        Ok(access_token)
    }

    /// Exchanges a signed assertion for `(access_token, expires_in)`.
    ///
    /// The body is read as text before checking the status so that the
    /// server's error payload ends up in the error message.
    async fn exchange(&self, assertion: &str) -> Result<(String, u64)> {
        let form = TokenRequest {
            grant_type: "client_credentials",
            client_id: &self.identity.client_id,
            client_assertion_type: CLIENT_ASSERTION_TYPE,
            client_assertion: assertion,
            scope: &self.scope,
        };

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AbmError::Auth {
                message: format!("token request to {} did not complete", self.token_url),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AbmError::Auth {
            message: "could not read token response body".to_string(),
            source: Some(Box::new(e)),
        })?;

        if !status.is_success() {
            return Err(AbmError::Auth {
                message: format!("token request failed ({status}): {body}"),
                source: None,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| AbmError::Auth {
            message: "token response is not valid JSON".to_string(),
            source: Some(Box::new(e)),
        })?;

        match (parsed.access_token, parsed.expires_in) {
            (Some(token), Some(expires_in)) if !token.is_empty() && expires_in > 0 => {
                tracing::debug!(expires_in, token_type = ?parsed.token_type, "token issued");
                Ok((token, expires_in))
            }
            _ => Err(AbmError::Auth {
                message: "token response is missing access_token or expires_in".to_string(),
                source: None,
            }),
        }
    }
}
