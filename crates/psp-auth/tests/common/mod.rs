//! Common test utilities for integration tests
//!
//! [`MockIdp`] is a wiremock identity provider serving a discovery document,
//! a key set and an introspection endpoint, so the HTTP-backed [`Auth`] can be
//! exercised end to end. Tokens are signed with the fixed key pairs from
//! `psp_auth::testing`.

#![allow(dead_code)]

use std::time::Duration;

use jsonwebtoken::jwk::Jwk;
use psp_auth::testing::{MockToken, SigningKey, TEST_KEY_ID};
use psp_auth::{Auth, AuthConfig};
use serde_json::{Map, Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const ISSUER: &str = "https://idp.example/";
pub const CLIENT_ID: &str = "myclient";
pub const CLIENT_SECRET: &str = "s3cret";

pub const DISCOVERY_PATH: &str = "/realms/psp/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/realms/psp/certs";
pub const INTROSPECTION_PATH: &str = "/realms/psp/token/introspect";

/// Mock identity provider
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    /// Start a server with nothing mounted
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a server serving discovery and the primary key, each any number of times
    pub async fn start_serving() -> Self {
        let idp = Self::start().await;
        idp.mount_discovery(None).await;
        idp.mount_jwks(vec![SigningKey::Primary.jwk(TEST_KEY_ID)], None)
            .await;
        idp
    }

    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.server.uri(), DISCOVERY_PATH)
    }

    pub fn discovery_document(&self) -> Value {
        let base = format!("{}/realms/psp", self.server.uri());
        json!({
            "issuer": ISSUER,
            "jwks_uri": format!("{base}/certs"),
            "introspection_endpoint": format!("{base}/token/introspect"),
            "userinfo_endpoint": format!("{base}/userinfo"),
            "end_session_endpoint": format!("{base}/logout"),
            "token_endpoint": format!("{base}/token"),
            "id_token_signing_alg_values_supported": ["RS256"],
        })
    }

    /// Serve the discovery document, verifying the hit count on drop when `expect` is set
    pub async fn mount_discovery(&self, expect: Option<u64>) {
        self.mount_discovery_with(
            ResponseTemplate::new(200).set_body_json(self.discovery_document()),
            expect,
        )
        .await;
    }

    pub async fn mount_discovery_with(&self, response: ResponseTemplate, expect: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(response);
        match expect {
            Some(n) => mock.expect(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Serve a key set built from `keys`
    pub async fn mount_jwks(&self, keys: Vec<Jwk>, expect: Option<u64>) {
        self.mount_jwks_with(
            ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })),
            expect,
        )
        .await;
    }

    pub async fn mount_jwks_with(&self, response: ResponseTemplate, expect: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response);
        match expect {
            Some(n) => mock.expect(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Configuration pointing at this server
    pub fn config(&self) -> AuthConfig {
        AuthConfig::builder(self.discovery_url(), CLIENT_ID)
            .client_secret(CLIENT_SECRET)
            .timeouts(Duration::from_secs(1), Duration::from_secs(2))
            .build()
            .expect("valid test configuration")
    }

    /// HTTP-backed `Auth` with the default test configuration
    pub fn auth(&self) -> Auth {
        Auth::new(self.config()).expect("auth builds")
    }
}

/// Claims of `token` as minted for [`ISSUER`] and [`CLIENT_ID`]
pub fn claims(token: &MockToken) -> Map<String, Value> {
    token.claims(ISSUER, CLIENT_ID)
}

/// Sign `token` with the primary key under [`TEST_KEY_ID`]
pub fn issue(token: &MockToken) -> String {
    SigningKey::Primary
        .sign(TEST_KEY_ID, &claims(token))
        .expect("token signs")
}

/// `Authorization` header value for `token`
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Convert a JSON object literal into a claims map
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
