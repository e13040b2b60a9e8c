//! OpenID Connect discovery metadata resolution
//!
//! The identity provider's discovery document names the issuer and every
//! endpoint the auth core talks to. [`DiscoveryClient`] fetches it from the
//! configured URL and caches it for a TTL; [`StaticMetadata`] serves a fixed
//! document for tests and offline hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cache::SingleFlight;
use crate::error::{AuthError, Result};
use crate::http_client;

/// Endpoints and issuer advertised by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Issuer identifier; tokens must carry exactly this `iss`
    pub issuer: String,
    /// Signing key set location
    pub jwks_uri: String,
    /// RFC 7662 introspection endpoint
    pub introspection_endpoint: String,
    /// OIDC userinfo endpoint
    pub userinfo_endpoint: String,
    /// RP-initiated logout endpoint
    pub end_session_endpoint: String,
    /// Token endpoint, when advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

/// Wire form of the discovery document before required-field checks
#[derive(Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    jwks_uri: Option<String>,
    introspection_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

fn required(field: &'static str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| {
        AuthError::Discovery(format!("discovery document is missing `{field}`"))
    })
}

impl Metadata {
    /// Parse a discovery document, naming the first missing required field
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let doc: DiscoveryDocument = serde_json::from_slice(body)
            .map_err(|e| AuthError::Discovery(format!("invalid discovery document: {e}")))?;

        Ok(Self {
            issuer: required("issuer", doc.issuer)?,
            jwks_uri: required("jwks_uri", doc.jwks_uri)?,
            introspection_endpoint: required(
                "introspection_endpoint",
                doc.introspection_endpoint,
            )?,
            userinfo_endpoint: required("userinfo_endpoint", doc.userinfo_endpoint)?,
            end_session_endpoint: required("end_session_endpoint", doc.end_session_endpoint)?,
            token_endpoint: doc.token_endpoint,
        })
    }
}

/// Source of discovery metadata
#[async_trait]
pub trait MetadataSource: Send + Sync + std::fmt::Debug {
    /// Current metadata, fetching it if the cached copy is absent or stale
    async fn resolve(&self) -> Result<Arc<Metadata>>;

    /// Drop any cached copy so the next [`resolve`](Self::resolve) re-fetches
    fn invalidate(&self);
}

/// HTTP discovery client with a TTL cache
#[derive(Debug)]
pub struct DiscoveryClient {
    url: String,
    http_client: reqwest::Client,
    cache: SingleFlight<Metadata>,
}

impl DiscoveryClient {
    /// Create a client for `url` using `http_client` and caching for `ttl`
    pub fn new(url: impl Into<String>, http_client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            http_client,
            cache: SingleFlight::new("discovery", ttl),
        }
    }

    /// The discovery document location
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(client: reqwest::Client, url: String) -> Result<Metadata> {
        info!(discovery_url = %url, "Fetching discovery metadata");

        let response = client.get(&url).send().await.map_err(|e| {
            error!(discovery_url = %url, error = %e, "Discovery request failed");
            AuthError::Discovery(http_client::describe(&e))
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(discovery_url = %url, status = status.as_u16(), "Discovery endpoint returned error status");
            return Err(AuthError::Discovery(format!(
                "discovery endpoint returned HTTP {status}"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            error!(discovery_url = %url, error = %e, "Failed to read discovery response");
            AuthError::Discovery(http_client::describe(&e))
        })?;

        let metadata = Metadata::from_json(&body).inspect_err(|e| {
            error!(discovery_url = %url, error = %e, "Rejected discovery document");
        })?;

        info!(
            discovery_url = %url,
            issuer = %metadata.issuer,
            "Discovery metadata fetched"
        );
        Ok(metadata)
    }
}

#[async_trait]
impl MetadataSource for DiscoveryClient {
    async fn resolve(&self) -> Result<Arc<Metadata>> {
        let client = self.http_client.clone();
        let url = self.url.clone();
        self.cache
            .get_or_fetch(move || Self::fetch(client, url))
            .await
    }

    fn invalidate(&self) {
        self.cache.invalidate();
    }
}

/// Fixed metadata, never fetched
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    metadata: Arc<Metadata>,
}

impl StaticMetadata {
    /// Serve `metadata` for every resolve
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
        }
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn resolve(&self) -> Result<Arc<Metadata>> {
        Ok(Arc::clone(&self.metadata))
    }

    fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "issuer": "https://idp.example/",
        "jwks_uri": "https://idp.example/certs",
        "introspection_endpoint": "https://idp.example/introspect",
        "userinfo_endpoint": "https://idp.example/userinfo",
        "end_session_endpoint": "https://idp.example/logout",
        "token_endpoint": "https://idp.example/token",
        "grant_types_supported": ["authorization_code"]
    }"#;

    #[test]
    fn test_parse_full_document() {
        let metadata = Metadata::from_json(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(metadata.issuer, "https://idp.example/");
        assert_eq!(metadata.jwks_uri, "https://idp.example/certs");
        assert_eq!(
            metadata.token_endpoint.as_deref(),
            Some("https://idp.example/token")
        );
    }

    #[test]
    fn test_missing_field_is_named() {
        let doc = r#"{
            "issuer": "https://idp.example/",
            "introspection_endpoint": "https://idp.example/introspect",
            "userinfo_endpoint": "https://idp.example/userinfo",
            "end_session_endpoint": "https://idp.example/logout"
        }"#;
        let err = Metadata::from_json(doc.as_bytes()).unwrap_err();
        assert!(matches!(&err, AuthError::Discovery(msg) if msg.contains("jwks_uri")));
    }

    #[test]
    fn test_token_endpoint_is_optional() {
        let doc = r#"{
            "issuer": "i",
            "jwks_uri": "j",
            "introspection_endpoint": "k",
            "userinfo_endpoint": "u",
            "end_session_endpoint": "e"
        }"#;
        let metadata = Metadata::from_json(doc.as_bytes()).unwrap();
        assert!(metadata.token_endpoint.is_none());
    }

    #[test]
    fn test_invalid_json() {
        let err = Metadata::from_json(b"<html>").unwrap_err();
        assert!(matches!(err, AuthError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_static_metadata_resolves() {
        let metadata = Metadata::from_json(DOCUMENT.as_bytes()).unwrap();
        let source = StaticMetadata::new(metadata.clone());
        source.invalidate();
        assert_eq!(*source.resolve().await.unwrap(), metadata);
    }
}
