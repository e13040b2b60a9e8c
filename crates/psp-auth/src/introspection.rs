//! OAuth 2.0 Token Introspection (RFC 7662)
//!
//! A locally valid JWT stays valid until `exp` even if the identity provider
//! revoked it. Introspection asks the provider whether the token is still
//! active. It costs one HTTP round trip per call and is never cached.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::discovery::MetadataSource;
use crate::error::{AuthError, Result};
use crate::http_client;

/// Token introspection response per RFC 7662 Section 2.2
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct IntrospectionResponse {
    /// `true` only when the endpoint answered with JSON `true`
    #[serde(default, deserialize_with = "strictly_true")]
    pub active: bool,

    /// Scope(s) associated with the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Token type (Bearer, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration timestamp (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at timestamp (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience, string or array
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// JWT ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Additional fields
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

fn strictly_true<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)? == Value::Bool(true))
}

impl IntrospectionResponse {
    /// Parse an introspection body
    ///
    /// A body without `active` is treated as inactive and logged.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            AuthError::IntrospectionHttp(format!("invalid introspection response: {e}"))
        })?;

        if value.get("active").is_none() {
            warn!("Introspection response has no `active` field, treating token as inactive");
        }

        serde_json::from_value(value).map_err(|e| {
            AuthError::IntrospectionHttp(format!("invalid introspection response: {e}"))
        })
    }
}

/// Token introspection client authenticating with HTTP Basic credentials
#[derive(Clone)]
pub struct IntrospectionClient {
    metadata: Arc<dyn MetadataSource>,
    client_id: String,
    client_secret: SecretString,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("http_client", &"<reqwest::Client>")
            .finish()
    }
}

impl IntrospectionClient {
    /// Create a client that posts to the endpoint advertised by `metadata`
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            metadata,
            client_id: client_id.into(),
            client_secret,
            http_client,
        }
    }

    /// Introspect `token` and return the full response
    pub async fn introspect_response(&self, token: &str) -> Result<IntrospectionResponse> {
        let endpoint = self.metadata.resolve().await?.introspection_endpoint.clone();
        debug!(endpoint = %endpoint, "Introspecting token");

        let form = [("token", token), ("token_type_hint", "access_token")];
        let response = self
            .http_client
            .post(&endpoint)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %endpoint, error = %e, "Introspection request failed");
                AuthError::IntrospectionHttp(http_client::describe(&e))
            })?;

        let status = response.status();
        match status.as_u16() {
            401 => {
                error!(endpoint = %endpoint, client_id = %self.client_id, "Introspection rejected client credentials");
                return Err(AuthError::IntrospectionAuth { status: 401 });
            }
            403 => {
                error!(endpoint = %endpoint, client_id = %self.client_id, "Client is not permitted to introspect tokens");
                return Err(AuthError::IntrospectionAuth { status: 403 });
            }
            _ if !status.is_success() => {
                error!(endpoint = %endpoint, status = status.as_u16(), "Introspection endpoint returned error status");
                return Err(AuthError::IntrospectionHttp(format!(
                    "introspection endpoint returned HTTP {status}"
                )));
            }
            _ => {}
        }

        let body = response.bytes().await.map_err(|e| {
            error!(endpoint = %endpoint, error = %e, "Failed to read introspection response");
            AuthError::IntrospectionHttp(http_client::describe(&e))
        })?;

        IntrospectionResponse::from_json(&body)
    }

    /// Whether the identity provider still considers `token` active
    pub async fn introspect(&self, token: &str) -> Result<bool> {
        let response = self.introspect_response(token).await?;
        debug!(active = response.active, "Introspection completed");
        Ok(response.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspection_response_active() {
        let response =
            IntrospectionResponse::from_json(br#"{"active": true, "client_id": "myclient", "scope": "openid"}"#)
                .unwrap();
        assert!(response.active);
        assert_eq!(response.client_id.as_deref(), Some("myclient"));
        assert_eq!(response.scope.as_deref(), Some("openid"));
    }

    #[test]
    fn test_missing_active_is_inactive() {
        let response = IntrospectionResponse::from_json(br#"{"scope": "openid"}"#).unwrap();
        assert!(!response.active);
    }

    #[test]
    fn test_only_json_true_counts() {
        for body in [
            r#"{"active": "true"}"#,
            r#"{"active": 1}"#,
            r#"{"active": null}"#,
            r#"{"active": false}"#,
        ] {
            let response = IntrospectionResponse::from_json(body.as_bytes()).unwrap();
            assert!(!response.active, "{body} must not be active");
        }
    }

    #[test]
    fn test_extra_fields_are_kept() {
        let response =
            IntrospectionResponse::from_json(br#"{"active": true, "sid": "s-1", "aud": ["a", "b"]}"#)
                .unwrap();
        assert_eq!(response.additional.get("sid"), Some(&Value::from("s-1")));
        assert!(response.aud.is_some());
    }

    #[test]
    fn test_invalid_body() {
        let err = IntrospectionResponse::from_json(b"not json").unwrap_err();
        assert!(matches!(err, AuthError::IntrospectionHttp(_)));
    }
}
