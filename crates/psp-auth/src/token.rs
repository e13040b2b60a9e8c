//! Validated access token
//!
//! A [`Token`] only comes out of [`TokenValidator::validate`](crate::TokenValidator::validate):
//! its signature, issuer, audience and expiry have been checked. It is a
//! read-only view over the claims plus the resource (client id) the
//! validating service acts for, which scope namespacing and client role
//! lookups are relative to.

use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};

use crate::user::User;

/// A validated bearer token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    algorithm: Algorithm,
    key_id: Option<String>,
    claims: Map<String, Value>,
    resource: String,
}

impl Token {
    pub(crate) fn new(
        algorithm: Algorithm,
        key_id: Option<String>,
        claims: Map<String, Value>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            key_id,
            claims,
            resource: resource.into(),
        }
    }

    /// Build a token from claims without any validation
    ///
    /// For host test suites exercising policies without a signed token.
    #[cfg(any(test, feature = "testing"))]
    pub fn from_claims(claims: Map<String, Value>, resource: impl Into<String>) -> Self {
        Self::new(Algorithm::RS256, None, claims, resource)
    }

    /// Signature algorithm from the header
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// `kid` of the key that verified the signature
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Client id this token was validated for
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// All claims
    pub fn raw_claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A single claim by name
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    fn str_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// `iss`
    pub fn issuer(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    /// `sub`
    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// `aud`, normalized to a list whether it was a string or an array
    pub fn audiences(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// `iat` in seconds since the epoch
    pub fn issued_at(&self) -> Option<i64> {
        self.claims.get("iat").and_then(Value::as_i64)
    }

    /// `exp` in seconds since the epoch
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get("exp").and_then(Value::as_i64)
    }

    /// `jti`
    pub fn token_id(&self) -> Option<&str> {
        self.str_claim("jti")
    }

    /// `azp`
    pub fn authorized_party(&self) -> Option<&str> {
        self.str_claim("azp")
    }

    /// `sid`
    pub fn session_id(&self) -> Option<&str> {
        self.str_claim("sid")
    }

    /// `acr`
    pub fn auth_context_class(&self) -> Option<&str> {
        self.str_claim("acr")
    }

    /// Scopes from the space-delimited `scope` claim
    pub fn scopes(&self) -> Vec<&str> {
        self.str_claim("scope")
            .map(|s| s.split(' ').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Whether `scope` is granted, compared verbatim
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }

    /// Whether every scope is granted
    ///
    /// With `namespaced`, each scope is compared as `"<resource>:<scope>"`.
    pub fn has_scopes<S: AsRef<str>>(&self, scopes: &[S], namespaced: bool) -> bool {
        self.missing_scope(scopes, namespaced).is_none()
    }

    /// First scope that is not granted, in the form it was compared
    pub fn missing_scope<S: AsRef<str>>(&self, scopes: &[S], namespaced: bool) -> Option<String> {
        let granted = self.scopes();
        scopes
            .iter()
            .map(|scope| {
                if namespaced {
                    format!("{}:{}", self.resource, scope.as_ref())
                } else {
                    scope.as_ref().to_string()
                }
            })
            .find(|scope| !granted.contains(&scope.as_str()))
    }

    /// Identity and role view of the token's subject
    pub fn user(&self) -> User<'_> {
        User::new(&self.claims, &self.resource)
    }
}
