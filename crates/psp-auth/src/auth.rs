//! The [`Auth`] facade
//!
//! One `Auth` owns the discovery cache, the key set cache, the validator and
//! the introspection client for a single configuration. Hosts build it once
//! at startup and share it (usually behind an `Arc`) with every request.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{AuthConfig, ConfigError, IntrospectionMode};
use crate::discovery::{DiscoveryClient, Metadata, MetadataSource};
use crate::error::{AuthError, Result};
use crate::http_client;
use crate::introspection::{IntrospectionClient, IntrospectionResponse};
use crate::jwks::{JwksClient, KeySource};
use crate::policy::{Policy, Requirement};
use crate::token::Token;
use crate::validator::{TokenValidator, extract_bearer};

/// Authentication and authorization for one identity provider and client id
#[derive(Debug)]
pub struct Auth {
    config: AuthConfig,
    metadata: Arc<dyn MetadataSource>,
    keys: Arc<dyn KeySource>,
    validator: TokenValidator,
    introspection: IntrospectionClient,
}

impl Auth {
    /// Build an `Auth` that discovers the identity provider over HTTP
    ///
    /// Nothing is fetched here; discovery and keys load on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: AuthConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let client = http_client::build_client(&config.timeouts)?;

        let metadata: Arc<dyn MetadataSource> = Arc::new(DiscoveryClient::new(
            config.discovery_url.clone(),
            client.clone(),
            config.cache.metadata_ttl,
        ));
        let keys: Arc<dyn KeySource> = Arc::new(JwksClient::new(
            Arc::clone(&metadata),
            client.clone(),
            config.cache.keys_ttl,
        ));

        info!(
            discovery_url = %config.discovery_url,
            client_id = %config.client_id,
            introspection = ?config.introspection,
            "Auth initialized"
        );
        Ok(Self::assemble(config, metadata, keys, client))
    }

    /// Build an `Auth` over caller-provided metadata and key sources
    ///
    /// Used with [`StaticMetadata`](crate::StaticMetadata) and
    /// [`StaticKeys`](crate::StaticKeys) in tests, or with custom sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails
    /// [`AuthConfig::validate`], or [`ConfigError::HttpClient`] if the
    /// introspection HTTP client cannot be built.
    pub fn with_sources(
        config: AuthConfig,
        metadata: Arc<dyn MetadataSource>,
        keys: Arc<dyn KeySource>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let client = http_client::build_client(&config.timeouts)?;
        Ok(Self::assemble(config, metadata, keys, client))
    }

    fn assemble(
        config: AuthConfig,
        metadata: Arc<dyn MetadataSource>,
        keys: Arc<dyn KeySource>,
        http_client: reqwest::Client,
    ) -> Self {
        let validator = TokenValidator::new(
            Arc::clone(&metadata),
            Arc::clone(&keys),
            config.client_id.clone(),
        )
        .with_audience(config.expected_audience())
        .with_audience_check(config.verify_audience)
        .with_leeway(config.leeway)
        .with_key_refresh_cooldown(config.cache.key_refresh_cooldown);

        let introspection = IntrospectionClient::new(
            Arc::clone(&metadata),
            config.client_id.clone(),
            config.client_secret.clone(),
            http_client,
        );

        Self {
            config,
            metadata,
            keys,
            validator,
            introspection,
        }
    }

    /// The configuration this instance was built from
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Client id tokens are validated for
    pub fn resource(&self) -> &str {
        &self.config.client_id
    }

    /// Current discovery metadata
    pub async fn metadata(&self) -> Result<Arc<Metadata>> {
        self.metadata.resolve().await
    }

    /// Userinfo endpoint advertised by the identity provider
    pub async fn userinfo_endpoint(&self) -> Result<String> {
        Ok(self.metadata.resolve().await?.userinfo_endpoint.clone())
    }

    /// Logout endpoint advertised by the identity provider
    pub async fn end_session_endpoint(&self) -> Result<String> {
        Ok(self.metadata.resolve().await?.end_session_endpoint.clone())
    }

    /// Validate a raw token locally (signature, issuer, audience, expiry)
    pub async fn validate_token(&self, raw: &str) -> Result<Token> {
        self.validator.validate(raw).await
    }

    /// Ask the identity provider whether `raw` is still active
    pub async fn validate_token_remotely(&self, raw: &str) -> Result<bool> {
        self.introspection.introspect(raw).await
    }

    /// Full introspection response for `raw`
    pub async fn introspect(&self, raw: &str) -> Result<IntrospectionResponse> {
        self.introspection.introspect_response(raw).await
    }

    /// Authenticate an `Authorization` header value
    ///
    /// Extracts the bearer token and validates it. With
    /// [`IntrospectionMode::Required`] the token must also be active at the
    /// identity provider.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Token> {
        let raw = extract_bearer(header).inspect_err(|e| {
            debug!(error = %e, "Authorization header rejected");
        })?;
        let token = self.validator.validate(raw).await?;

        if self.config.introspection == IntrospectionMode::Required
            && !self.introspection.introspect(raw).await?
        {
            warn!(
                sub = token.subject().unwrap_or_default(),
                "Token is no longer active at the identity provider"
            );
            return Err(AuthError::TokenInactive);
        }

        Ok(token)
    }

    /// Authenticate the header, then enforce `policy`
    pub async fn authorize(&self, header: Option<&str>, policy: &Policy) -> Result<Token> {
        let token = self.authenticate(header).await?;
        policy.check(&token).inspect_err(|e| {
            debug!(
                sub = token.subject().unwrap_or_default(),
                error = %e,
                "Authorization denied"
            );
        })?;
        Ok(token)
    }

    /// Scope requirement namespaced per [`AuthConfig::namespaced_scopes`]
    pub fn require_scopes<I, S>(&self, scopes: I) -> Requirement
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::Scopes {
            scopes: scopes.into_iter().map(Into::into).collect(),
            namespaced: self.config.namespaced_scopes,
        }
    }

    /// Drop cached metadata and keys; the next request re-fetches both
    pub fn invalidate_caches(&self) {
        self.metadata.invalidate();
        self.keys.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticMetadata;
    use crate::jwks::StaticKeys;
    use crate::testing::{MockToken, TestAuth};

    #[tokio::test]
    async fn test_authenticate_header() {
        let test_auth = TestAuth::new("myclient");
        let raw = test_auth.issue_token(&MockToken::new()).unwrap();
        let header = TestAuth::auth_header(&raw);

        let token = test_auth.auth().authenticate(Some(&header)).await.unwrap();
        assert_eq!(token.resource(), "myclient");

        assert_eq!(
            test_auth.auth().authenticate(None).await,
            Err(AuthError::MissingAuthHeader)
        );
    }

    #[tokio::test]
    async fn test_authorize_with_config_namespacing() {
        let test_auth = TestAuth::new("myclient");
        let raw = test_auth
            .issue_token(&MockToken::new().scopes(["read"]))
            .unwrap();
        let header = TestAuth::auth_header(&raw);
        let auth = test_auth.auth();

        let policy = Policy::from(auth.require_scopes(["read"]));
        assert!(auth.authorize(Some(&header), &policy).await.is_ok());

        let policy = Policy::from(auth.require_scopes(["delete"]));
        assert_eq!(
            auth.authorize(Some(&header), &policy).await,
            Err(AuthError::InsufficientScope {
                scope: "myclient:delete".into()
            })
        );
    }

    #[tokio::test]
    async fn test_endpoints_from_metadata() {
        let test_auth = TestAuth::new("myclient");
        let auth = test_auth.auth();
        assert_eq!(
            auth.userinfo_endpoint().await.unwrap(),
            test_auth.metadata().userinfo_endpoint
        );
        assert_eq!(
            auth.end_session_endpoint().await.unwrap(),
            test_auth.metadata().end_session_endpoint
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = AuthConfig::new("", "myclient");
        assert!(matches!(Auth::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_with_sources_rejects_invalid_config() {
        let config = AuthConfig::new(
            "https://idp.example/.well-known/openid-configuration",
            "",
        );
        let result = Auth::with_sources(
            config,
            Arc::new(StaticMetadata::new(TestAuth::new("myclient").metadata())),
            Arc::new(StaticKeys::new(TestAuth::key_set())),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
