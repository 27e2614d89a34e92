//! Signed client assertions for the JWT-bearer client-credentials grant.
//!
//! An assertion is an ES256 JWT that proves possession of the identity's
//! private key. A new one is minted for every token exchange and never
//! cached; only the access token it buys is.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};

use crate::config::Identity;
use crate::error::{AbmError, Result};

/// Audience the token endpoint expects in every assertion.
pub const ASSERTION_AUDIENCE: &str = "https://account.apple.com/auth/oauth2/v2/token";

/// Assertion validity window: 180 days, the maximum the issuer accepts.
pub const ASSERTION_LIFETIME_SECS: i64 = 86_400 * 180;

/// Payload of a client assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Subject: the OAuth client id.
    pub sub: String,
    /// Audience: always [`ASSERTION_AUDIENCE`].
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds. Always `iat + ASSERTION_LIFETIME_SECS`.
    pub exp: i64,
    /// Random nonce so two assertions minted in the same second still differ.
    pub jti: String,
    /// Issuer: the team / organization id.
    pub iss: String,
}

impl AssertionClaims {
    fn new(identity: &Identity, issued_at: DateTime<Utc>) -> Self {
        let iat = issued_at.timestamp();
        AssertionClaims {
            sub: identity.client_id.clone(),
            aud: ASSERTION_AUDIENCE.to_string(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
            iss: identity.issuer_id.clone(),
        }
    }
}

/// Builds a compact, signed assertion for `identity` issued now.
pub fn build_assertion(identity: &Identity) -> Result<String> {
    build_assertion_at(identity, Utc::now())
}

/// Builds an assertion with an explicit issue time.
///
/// `issued_at` is truncated to whole seconds. Header is `{alg: ES256, kid}`.
pub fn build_assertion_at(identity: &Identity, issued_at: DateTime<Utc>) -> Result<String> {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(identity.key_id.clone());

    let claims = AssertionClaims::new(identity, issued_at);
    jsonwebtoken::encode(&header, &claims, &identity.key).map_err(AbmError::Assertion)
}
