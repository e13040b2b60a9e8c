//! In-memory identity provider for tests
//!
//! [`TestAuth`] wires an [`Auth`] to fixed metadata and a fixed RSA key pair,
//! so host services can mint tokens for their own route tests without an
//! identity provider:
//!
//! ```
//! use psp_auth::testing::{MockToken, TestAuth};
//!
//! # tokio_test::block_on(async {
//! let test_auth = TestAuth::new("myclient");
//! let token = test_auth
//!     .issue_token(&MockToken::new().scopes(["read"]).realm_role("admin"))
//!     .unwrap();
//! let header = TestAuth::auth_header(&token);
//!
//! let validated = test_auth.auth().authenticate(Some(&header)).await.unwrap();
//! assert_eq!(validated.user().given_name(), Some("John"));
//! # });
//! ```
//!
//! The key pair is public test material. Never trust it outside tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
    RSAKeyParameters, RSAKeyType,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value, json};

use crate::auth::Auth;
use crate::config::{AuthConfig, ConfigError};
use crate::discovery::{Metadata, StaticMetadata};
use crate::jwks::{KeySet, StaticKeys};

/// Issuer used by [`TestAuth::new`]
pub const TEST_ISSUER: &str = "psp-auth-testing";

/// `kid` of the key in [`TestAuth::key_set`]
pub const TEST_KEY_ID: &str = "psp-auth-test-key";

const TEST_BASE_URL: &str = "http://psp-auth-testing.invalid";

const PRIMARY_PEM: &str = include_str!("primary.pem");
const PRIMARY_N: &str = "wrv9WiIMfTk0RA_-xR24M8ORscyQQPAgeYRaVd0eI2oUfwE2vjiIQPvR4JB3En8op1_OAclL0TEhcQ2qMAOtXs4i4cvjvUgP9FecJaA-qba8km7Z-lwNkrwtZN_aRb7zmZogVBvDjPFkcQVnZ8F15SDzGmY_EElEHuIYovo_814tDBwysPoO5dQlPC130TRW8H1l3D5oAAOgzJBfc07s0Ue1gCBHN_nHDFaoMoqSgmHJIdmfNEGkZ22JA2K__3e_55EFZBUF2PaYJGvoliJEjOBmkvgVJ6gOTlHm4ssYxE1RSA_L2ZeVEFdg57dQJnuPll0UylcOBYaXNMDYgtSS-Q";

const SECONDARY_PEM: &str = include_str!("rogue.pem");
const SECONDARY_N: &str = "nuocnmWQC9OQnzsIYCiH5s17hEeLFYFWrLc3b8i8MKxHl5hCt7gq03dn2UtwbaR_YEhVSxrc2TICXoZ1LVABn16l4yzoBXEFhSM3Hs1qGG_aSilVs8zsz6KeK72RGORRFN-OmKjKZdgtgr2PpJ4iO_RXyMrr0tmR7DZpE8myGE3vWfIITrHu33Yjv6LsrlHbK1SChVzMs-_PfFpx3LmUAjFiM7Y2p-2Qs2s3HbuX8bOr2_VQNcdqaM2_kqU7jGWdZOGLySeJzU11rym-OsSlBr1IjcG0SWIkarpDwN8e85yNfd9O6uTTDpL-o_J5avObQ3BEUBfmuBeEC5libm-5zw";

const RSA_EXPONENT: &str = "AQAB";

/// One of the two fixed RSA key pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    /// The key published by [`TestAuth::key_set`]
    Primary,
    /// A second key, unknown to [`TestAuth::key_set`]
    Secondary,
}

impl SigningKey {
    fn pem(self) -> &'static str {
        match self {
            Self::Primary => PRIMARY_PEM,
            Self::Secondary => SECONDARY_PEM,
        }
    }

    /// Public half as an RS256 signing JWK with the given `kid`
    pub fn jwk(self, kid: &str) -> Jwk {
        let n = match self {
            Self::Primary => PRIMARY_N,
            Self::Secondary => SECONDARY_N,
        };
        Jwk {
            common: CommonParameters {
                public_key_use: Some(PublicKeyUse::Signature),
                key_operations: None,
                key_algorithm: Some(KeyAlgorithm::RS256),
                key_id: Some(kid.to_string()),
                x509_url: None,
                x509_chain: None,
                x509_sha1_fingerprint: None,
                x509_sha256_fingerprint: None,
            },
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: n.to_string(),
                e: RSA_EXPONENT.to_string(),
            }),
        }
    }

    /// Sign `claims` as an RS256 JWT with header `kid`
    pub fn sign(self, kid: &str, claims: &Map<String, Value>) -> jsonwebtoken::errors::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(self.pem().as_bytes())?;
        jsonwebtoken::encode(&header, claims, &key)
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Subject of a minted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUser {
    /// `sub`
    pub id: String,
    /// `preferred_username`
    pub username: String,
    /// `given_name`
    pub given_name: String,
    /// `family_name`
    pub family_name: String,
    /// `email`
    pub email: String,
}

impl Default for MockUser {
    fn default() -> Self {
        Self {
            id: "testuserid".to_string(),
            username: "jandoener123".to_string(),
            given_name: "John".to_string(),
            family_name: "Doe".to_string(),
            email: "john.doe@example.com".to_string(),
        }
    }
}

impl MockUser {
    /// `"<given> <family>"`, emitted as the `name` claim
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
    }
}

/// Claims of a token to mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockToken {
    /// Subject
    pub user: MockUser,
    /// Scopes prefixed with the client id when minted
    pub scopes: Vec<String>,
    /// Scopes minted verbatim
    pub raw_scopes: Vec<String>,
    /// `aud`; the client id when `None`
    pub audience: Option<Vec<String>>,
    /// `realm_access.roles`
    pub realm_roles: Vec<String>,
    /// `resource_access.<resource>.roles`
    pub resource_roles: BTreeMap<String, Vec<String>>,
    /// `jti`
    pub token_id: String,
    /// Seconds from now until `exp`; negative for an expired token
    pub expires_in: i64,
}

impl Default for MockToken {
    fn default() -> Self {
        Self {
            user: MockUser::default(),
            scopes: Vec::new(),
            raw_scopes: Vec::new(),
            audience: None,
            realm_roles: Vec::new(),
            resource_roles: BTreeMap::new(),
            token_id: "testtokenid".to_string(),
            expires_in: 3600,
        }
    }
}

impl MockToken {
    /// Token for the default [`MockUser`], valid for an hour
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `user` as subject
    #[must_use]
    pub fn user(mut self, user: MockUser) -> Self {
        self.user = user;
        self
    }

    /// Grant client-namespaced scopes
    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Grant scopes exactly as written
    #[must_use]
    pub fn raw_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Add an `aud` entry (replacing the client id default)
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience
            .get_or_insert_with(Vec::new)
            .push(audience.into());
        self
    }

    /// Grant a realm role
    #[must_use]
    pub fn realm_role(mut self, role: impl Into<String>) -> Self {
        self.realm_roles.push(role.into());
        self
    }

    /// Grant a role on a client
    #[must_use]
    pub fn resource_role(mut self, resource: impl Into<String>, role: impl Into<String>) -> Self {
        self.resource_roles
            .entry(resource.into())
            .or_default()
            .push(role.into());
        self
    }

    /// Set `jti`
    #[must_use]
    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = token_id.into();
        self
    }

    /// Expire `seconds` from now
    #[must_use]
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Already expired by a minute
    #[must_use]
    pub fn expired(self) -> Self {
        self.expires_in(-60)
    }

    /// The claim set this token mints to
    pub fn claims(&self, issuer: &str, client_id: &str) -> Map<String, Value> {
        let issued_at = now();
        let mut claims = Map::new();
        claims.insert("iss".into(), json!(issuer));
        claims.insert("sub".into(), json!(self.user.id));
        claims.insert("iat".into(), json!(issued_at));
        claims.insert("exp".into(), json!(issued_at + self.expires_in));
        claims.insert("jti".into(), json!(self.token_id));
        claims.insert("typ".into(), json!("Bearer"));
        claims.insert("azp".into(), json!(client_id));

        let aud = match &self.audience {
            None => json!(client_id),
            Some(list) if list.len() == 1 => json!(list[0]),
            Some(list) => json!(list),
        };
        claims.insert("aud".into(), aud);

        let scope: Vec<String> = self
            .scopes
            .iter()
            .map(|s| format!("{client_id}:{s}"))
            .chain(self.raw_scopes.iter().cloned())
            .collect();
        if !scope.is_empty() {
            claims.insert("scope".into(), json!(scope.join(" ")));
        }

        claims.insert("name".into(), json!(self.user.full_name()));
        claims.insert("given_name".into(), json!(self.user.given_name));
        claims.insert("family_name".into(), json!(self.user.family_name));
        claims.insert("preferred_username".into(), json!(self.user.username));
        claims.insert("email".into(), json!(self.user.email));
        claims.insert("email_verified".into(), json!(true));

        if !self.realm_roles.is_empty() {
            claims.insert("realm_access".into(), json!({ "roles": self.realm_roles }));
        }
        if !self.resource_roles.is_empty() {
            let access: Map<String, Value> = self
                .resource_roles
                .iter()
                .map(|(resource, roles)| (resource.clone(), json!({ "roles": roles })))
                .collect();
            claims.insert("resource_access".into(), Value::Object(access));
        }

        claims
    }
}

/// An [`Auth`] backed by fixed metadata and a fixed signing key
#[derive(Debug)]
pub struct TestAuth {
    issuer: String,
    client_id: String,
    auth: Arc<Auth>,
}

impl TestAuth {
    /// Test provider with issuer [`TEST_ISSUER`]
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client backing introspection cannot be built.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_issuer(client_id, TEST_ISSUER)
    }

    /// Test provider with a custom issuer
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client backing introspection cannot be built.
    pub fn with_issuer(client_id: impl Into<String>, issuer: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let config = AuthConfig::new(
            format!("{TEST_BASE_URL}/.well-known/openid-configuration"),
            client_id,
        );
        match Self::with_config(config, issuer) {
            Ok(test_auth) => test_auth,
            Err(e) => panic!("failed to build test auth: {e}"),
        }
    }

    /// Test provider using `config` for everything but discovery and keys
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation, or
    /// [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn with_config(
        config: AuthConfig,
        issuer: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let issuer = issuer.into();
        let client_id = config.client_id.clone();
        let auth = Auth::with_sources(
            config,
            Arc::new(StaticMetadata::new(Self::metadata_for(&issuer))),
            Arc::new(StaticKeys::new(Self::key_set())),
        )?;
        Ok(Self {
            issuer,
            client_id,
            auth: Arc::new(auth),
        })
    }

    fn metadata_for(issuer: &str) -> Metadata {
        Metadata {
            issuer: issuer.to_string(),
            jwks_uri: format!("{TEST_BASE_URL}/certs"),
            introspection_endpoint: format!("{TEST_BASE_URL}/token/introspect"),
            userinfo_endpoint: format!("{TEST_BASE_URL}/userinfo"),
            end_session_endpoint: format!("{TEST_BASE_URL}/logout"),
            token_endpoint: Some(format!("{TEST_BASE_URL}/token")),
        }
    }

    /// The wired `Auth`
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Shared handle to the wired `Auth`, for middleware layers
    pub fn shared_auth(&self) -> Arc<Auth> {
        Arc::clone(&self.auth)
    }

    /// Issuer minted into tokens
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Client id tokens are minted for
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Metadata the wired `Auth` resolves
    pub fn metadata(&self) -> Metadata {
        Self::metadata_for(&self.issuer)
    }

    /// Key set holding the primary public key under [`TEST_KEY_ID`]
    pub fn key_set() -> KeySet {
        KeySet::new(JwkSet {
            keys: vec![SigningKey::Primary.jwk(TEST_KEY_ID)],
        })
    }

    /// Mint a signed token
    pub fn issue_token(&self, token: &MockToken) -> jsonwebtoken::errors::Result<String> {
        SigningKey::Primary.sign(TEST_KEY_ID, &token.claims(&self.issuer, &self.client_id))
    }

    /// Mint a token signed by a key outside the key set, under the trusted `kid`
    pub fn issue_with_rogue_key(&self, token: &MockToken) -> jsonwebtoken::errors::Result<String> {
        SigningKey::Secondary.sign(TEST_KEY_ID, &token.claims(&self.issuer, &self.client_id))
    }

    /// Sign arbitrary claims with the trusted key
    pub fn issue_claims(&self, claims: &Map<String, Value>) -> jsonwebtoken::errors::Result<String> {
        SigningKey::Primary.sign(TEST_KEY_ID, claims)
    }

    /// `Authorization` header value for `token`
    pub fn auth_header(token: &str) -> String {
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        assert_eq!(MockUser::default().full_name(), "John Doe");
    }

    #[test]
    fn test_claims_namespace_scopes_and_default_audience() {
        let claims = MockToken::new()
            .scopes(["read"])
            .raw_scopes(["openid"])
            .claims("iss", "myclient");
        assert_eq!(claims["scope"], json!("myclient:read openid"));
        assert_eq!(claims["aud"], json!("myclient"));
        assert!(claims.get("realm_access").is_none());
    }

    #[test]
    fn test_claims_roles() {
        let claims = MockToken::new()
            .realm_role("admin")
            .resource_role("X", "reader")
            .audience("a")
            .audience("b")
            .claims("iss", "myclient");
        assert_eq!(claims["realm_access"], json!({"roles": ["admin"]}));
        assert_eq!(claims["resource_access"], json!({"X": {"roles": ["reader"]}}));
        assert_eq!(claims["aud"], json!(["a", "b"]));
    }

    #[test]
    fn test_expired_token_claims() {
        let claims = MockToken::new().expired().claims("iss", "myclient");
        assert!(claims["exp"].as_i64().unwrap() < claims["iat"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn test_issued_token_validates() {
        let test_auth = TestAuth::new("myclient");
        let raw = test_auth.issue_token(&MockToken::new()).unwrap();
        let token = test_auth.auth().validate_token(&raw).await.unwrap();
        assert_eq!(token.issuer(), Some(TEST_ISSUER));
        assert_eq!(token.user().full_name(), Some("John Doe"));
    }
}
