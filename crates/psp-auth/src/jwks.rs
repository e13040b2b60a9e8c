//! Signing key set fetching and caching
//!
//! [`JwksClient`] resolves the key set location through a [`MetadataSource`]
//! and caches the parsed [`KeySet`] for a TTL. A token signed with a key id
//! the cached set does not know triggers at most one re-fetch per cooldown
//! window ([`KeySource::refresh`]), so key rotation at the identity provider
//! is picked up without letting unknown-`kid` tokens hammer the endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::cache::SingleFlight;
use crate::discovery::MetadataSource;
use crate::error::{AuthError, Result};
use crate::http_client;

/// Public signing keys indexed by key id
#[derive(Debug, Clone)]
pub struct KeySet {
    inner: JwkSet,
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

impl KeySet {
    /// Wrap an already parsed key set
    pub fn new(keys: JwkSet) -> Self {
        Self { inner: keys }
    }

    /// Parse a JWKS document
    ///
    /// Individual keys that do not parse (unsupported key types) are skipped
    /// with a warning; a document without a `keys` array is an error.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let raw: RawKeySet = serde_json::from_slice(body)
            .map_err(|e| AuthError::KeyFetch(format!("invalid JWKS document: {e}")))?;

        let mut keys = Vec::with_capacity(raw.keys.len());
        for value in raw.keys {
            match serde_json::from_value::<Jwk>(value) {
                Ok(jwk) => keys.push(jwk),
                Err(e) => warn!(error = %e, "Skipping unsupported key in JWKS"),
            }
        }

        Ok(Self {
            inner: JwkSet { keys },
        })
    }

    /// Signing key with the given `kid`
    ///
    /// Keys published for encryption only are never returned.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.inner.keys.iter().find(|jwk| {
            jwk.common.key_id.as_deref() == Some(kid)
                && !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
        })
    }

    /// Key ids present in the set
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.inner
            .keys
            .iter()
            .filter_map(|jwk| jwk.common.key_id.as_deref())
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.inner.keys.len()
    }

    /// `true` when the set holds no keys
    pub fn is_empty(&self) -> bool {
        self.inner.keys.is_empty()
    }

    /// The underlying `JwkSet`
    pub fn as_jwk_set(&self) -> &JwkSet {
        &self.inner
    }
}

impl From<JwkSet> for KeySet {
    fn from(keys: JwkSet) -> Self {
        Self::new(keys)
    }
}

/// Source of signing keys
#[async_trait]
pub trait KeySource: Send + Sync + std::fmt::Debug {
    /// Current key set, fetching it if the cached copy is absent or stale
    async fn keys(&self) -> Result<Arc<KeySet>>;

    /// Drop any cached copy so the next [`keys`](Self::keys) re-fetches
    fn invalidate(&self);

    /// Re-fetch the key set unless the cached copy or the last refresh
    /// attempt is younger than `cooldown`
    ///
    /// Returns the new set, or `None` when no refresh was allowed or the
    /// re-fetch failed. A failed re-fetch leaves the cached set in place.
    async fn refresh(&self, cooldown: Duration) -> Result<Option<Arc<KeySet>>> {
        let _ = cooldown;
        Ok(None)
    }
}

/// HTTP key set client with a TTL cache
#[derive(Debug)]
pub struct JwksClient {
    metadata: Arc<dyn MetadataSource>,
    http_client: reqwest::Client,
    cache: SingleFlight<KeySet>,
    last_refresh: Mutex<Option<Instant>>,
}

impl JwksClient {
    /// Create a client that locates the key set through `metadata`
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        http_client: reqwest::Client,
        ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            http_client,
            cache: SingleFlight::new("jwks", ttl),
            last_refresh: Mutex::new(None),
        }
    }

    async fn fetch(
        metadata: Arc<dyn MetadataSource>,
        client: reqwest::Client,
    ) -> Result<KeySet> {
        let jwks_uri = metadata.resolve().await?.jwks_uri.clone();
        info!(jwks_uri = %jwks_uri, "Fetching JWKS from endpoint");

        let response = client.get(&jwks_uri).send().await.map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "JWKS request failed");
            AuthError::KeyFetch(http_client::describe(&e))
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %jwks_uri, status = status.as_u16(), "JWKS endpoint returned error status");
            return Err(AuthError::KeyFetch(format!(
                "JWKS endpoint returned HTTP {status}"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Failed to read JWKS response");
            AuthError::KeyFetch(http_client::describe(&e))
        })?;

        let keys = KeySet::from_json(&body).inspect_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Rejected JWKS document");
        })?;

        info!(jwks_uri = %jwks_uri, key_count = keys.len(), "JWKS fetched and cached");
        Ok(keys)
    }
}

#[async_trait]
impl KeySource for JwksClient {
    async fn keys(&self) -> Result<Arc<KeySet>> {
        let metadata = Arc::clone(&self.metadata);
        let client = self.http_client.clone();
        self.cache
            .get_or_fetch(move || Self::fetch(metadata, client))
            .await
    }

    fn invalidate(&self) {
        self.cache.invalidate();
    }

    async fn refresh(&self, cooldown: Duration) -> Result<Option<Arc<KeySet>>> {
        {
            let mut last_refresh = self.last_refresh.lock();
            let recent_attempt = last_refresh.is_some_and(|at| at.elapsed() < cooldown);
            let fresh_keys = self.cache.age().is_some_and(|age| age < cooldown);
            if recent_attempt || fresh_keys {
                debug!("JWKS refresh suppressed by cooldown");
                return Ok(None);
            }
            *last_refresh = Some(Instant::now());
        }

        let metadata = Arc::clone(&self.metadata);
        let client = self.http_client.clone();
        match self
            .cache
            .refetch(move || Self::fetch(metadata, client))
            .await
        {
            Ok(keys) => Ok(Some(keys)),
            Err(e) => {
                warn!(error = %e, "JWKS refresh failed, keeping cached key set");
                Ok(None)
            }
        }
    }
}

/// Fixed key set, never fetched
#[derive(Debug, Clone)]
pub struct StaticKeys {
    keys: Arc<KeySet>,
}

impl StaticKeys {
    /// Serve `keys` for every lookup
    pub fn new(keys: impl Into<KeySet>) -> Self {
        Self {
            keys: Arc::new(keys.into()),
        }
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn keys(&self) -> Result<Arc<KeySet>> {
        Ok(Arc::clone(&self.keys))
    }

    fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWKS: &str = r#"{
        "keys": [
            {"kty": "RSA", "kid": "sig-1", "use": "sig", "alg": "RS256", "n": "wrv9WiIMfTk0RA", "e": "AQAB"},
            {"kty": "RSA", "kid": "enc-1", "use": "enc", "n": "nuocnmWQC9OQ", "e": "AQAB"},
            {"kty": "unknown-type", "kid": "weird"}
        ]
    }"#;

    #[test]
    fn test_parse_skips_unsupported_keys() {
        let keys = KeySet::from_json(JWKS.as_bytes()).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.kids().collect::<Vec<_>>(), vec!["sig-1", "enc-1"]);
    }

    #[test]
    fn test_find_ignores_encryption_keys() {
        let keys = KeySet::from_json(JWKS.as_bytes()).unwrap();
        assert!(keys.find("sig-1").is_some());
        assert!(keys.find("enc-1").is_none());
        assert!(keys.find("missing").is_none());
    }

    #[test]
    fn test_missing_keys_array_is_error() {
        let err = KeySet::from_json(br#"{"foo": []}"#).unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch(_)));
    }

    #[tokio::test]
    async fn test_static_keys_never_refresh() {
        let source = StaticKeys::new(KeySet::from_json(JWKS.as_bytes()).unwrap());
        assert!(source.refresh(Duration::ZERO).await.unwrap().is_none());
        assert_eq!(source.keys().await.unwrap().len(), 2);
    }
}
