//! Single-record, file-backed cache for the access token.
//!
//! The cache file is one JSON object `{"token": "...", "expires_at": <unix secs>}`.
//! A missing, unreadable, or malformed file is a cache miss, never an error.
//! Writes go through a temp file in the same directory followed by a rename,
//! so a concurrent reader sees either the old record or the new one.
//!
//! `expires_at` is not the server's expiry: it is issuance time plus 75% of
//! the declared lifetime, so the token is replaced well before it dies.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AbmError, Result};

/// Fraction of the server-declared lifetime we actually trust.
pub const LIFETIME_SAFETY_FACTOR: f64 = 0.75;

/// The persisted token record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Opaque bearer token.
    pub token: String,
    /// Unix timestamp (seconds, fractional) after which the token is stale.
    pub expires_at: f64,
}

impl CachedToken {
    /// `true` iff now is strictly before `expires_at`.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Validity check against an explicit clock reading.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        unix_seconds(now) < self.expires_at
    }

    /// `expires_at` in the local timezone, for display.
    pub fn expires_at_local(&self) -> Option<DateTime<Local>> {
        let secs = self.expires_at.floor();
        let nanos = ((self.expires_at - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos).map(|t| t.with_timezone(&Local))
    }
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// Handle on the cache file. Holds no token state of its own.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Cache backed by the file at `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenCache { path: path.into() }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored record, or `None` if the file is absent,
    /// unreadable, not a `{token, expires_at}` object, or holds an empty token.
    pub fn load(&self) -> Option<CachedToken> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no token cache file");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "token cache unreadable, ignoring");
                return None;
            }
        };

        match serde_json::from_str::<CachedToken>(&raw) {
            Ok(cached) if cached.token.is_empty() => {
                tracing::warn!(path = %self.path.display(), "token cache holds an empty token, ignoring");
                None
            }
            Ok(cached) if cached.expires_at.is_finite() => Some(cached),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "token cache has non-finite expiry, ignoring");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "token cache is corrupt, ignoring");
                None
            }
        }
    }

    /// Persists `access_token` with `expires_at = now + 0.75 * lifetime_secs`,
    /// replacing any previous record.
    ///
    /// # Errors
    ///
    /// `AbmError::CacheWrite` if the temp file cannot be created, written,
    /// or renamed over the cache path.
    pub fn store(&self, access_token: &str, lifetime_secs: u64) -> Result<CachedToken> {
        self.store_at(access_token, lifetime_secs, Utc::now())
    }

    /// [`store`](Self::store) with an explicit issuance time.
    pub fn store_at(
        &self,
        access_token: &str,
        lifetime_secs: u64,
        issued_at: DateTime<Utc>,
    ) -> Result<CachedToken> {
        let record = CachedToken {
            token: access_token.to_string(),
            expires_at: unix_seconds(issued_at) + lifetime_secs as f64 * LIFETIME_SAFETY_FACTOR,
        };

        let body = serde_json::to_vec(&record)?;
        self.replace_atomically(&body)
            .map_err(|source| AbmError::CacheWrite {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = %self.path.display(), expires_at = record.expires_at, "token cached");
        Ok(record)
    }

    fn replace_atomically(&self, body: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cache_in(dir: &tempfile::TempDir) -> TokenCache {
        TokenCache::new(dir.path().join(".token_cache"))
    }

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cache_in(&dir).load().is_none());
    }

    #[test]
    fn invalid_json_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), "{not json").unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn missing_field_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), r#"{"token":"abc"}"#).unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn wrongly_typed_field_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), r#"{"token":"abc","expires_at":"tomorrow"}"#).unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn empty_token_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), r#"{"token":"","expires_at":4102444800}"#).unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn integer_expiry_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), r#"{"token":"abc","expires_at":4102444800}"#).unwrap();
        let cached = cache.load().expect("integer timestamps are valid");
        assert_eq!(cached.token, "abc");
        assert!(cached.is_valid());
    }

    #[test]
    fn store_then_load_applies_safety_margin() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let issued = Utc::now();

        cache.store_at("tok-1", 3600, issued).unwrap();
        let loaded = cache.load().unwrap();

        assert_eq!(loaded.token, "tok-1");
        let expected = unix_seconds(issued) + 2700.0;
        assert!(
            (loaded.expires_at - expected).abs() < 0.001,
            "expires_at should be issuance + 75% of lifetime"
        );
    }

    #[test]
    fn store_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.store("first", 3600).unwrap();
        cache.store("second", 3600).unwrap();
        assert_eq!(cache.load().unwrap().token, "second");

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "no temp files should remain next to the cache");
    }

    #[test]
    fn store_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("absent").join(".token_cache"));
        let err = cache.store("tok", 3600).unwrap_err();
        assert!(matches!(err, AbmError::CacheWrite { .. }));
    }

    #[test]
    fn validity_is_strictly_before_expiry() {
        let now = Utc::now();
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: unix_seconds(now),
        };
        assert!(!token.is_valid_at(now), "expired exactly at expires_at");
        assert!(token.is_valid_at(now - Duration::seconds(1)));
        assert!(!token.is_valid_at(now + Duration::seconds(1)));
    }

    #[test]
    fn expiry_converts_to_local_time() {
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: 1_700_000_000.5,
        };
        let local = token.expires_at_local().unwrap();
        assert_eq!(local.timestamp(), 1_700_000_000);
    }
}
