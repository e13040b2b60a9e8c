//! Bearer token validation
//!
//! [`TokenValidator::validate`] turns a compact JWT into a [`Token`] by
//! checking, in order:
//!
//! 1. structure (header and payload decode) and an asymmetric algorithm
//! 2. expiry, before any network I/O, so an expired token is reported as
//!    [`AuthError::TokenExpired`] whatever its signature
//! 3. the signature, against the key whose `kid` matches the header
//! 4. `iss`, which must equal the discovered issuer exactly
//! 5. `aud`, which must contain the expected audience (string or array form)
//!
//! Registered-claim checks of `jsonwebtoken` are switched off; steps 2, 4 and
//! 5 are done here so each failure maps to its own error.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::discovery::MetadataSource;
use crate::error::{AuthError, Result};
use crate::jwks::KeySource;
use crate::token::Token;

/// Algorithms accepted by default; symmetric `HS*` is never accepted
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Extract the token from an `Authorization` header value
///
/// The value must be exactly two whitespace-separated parts, the first being
/// `Bearer` in any case.
///
/// ```
/// use psp_auth::{AuthError, extract_bearer};
///
/// assert_eq!(extract_bearer(Some("Bearer abc")), Ok("abc"));
/// assert_eq!(extract_bearer(None), Err(AuthError::MissingAuthHeader));
/// assert!(extract_bearer(Some("Token abc")).is_err());
/// ```
pub fn extract_bearer(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or(AuthError::MissingAuthHeader)?;
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        (Some(scheme), Some(_), None) => Err(AuthError::MalformedAuthHeader(format!(
            "unsupported scheme `{scheme}`, expected `Bearer <token>`"
        ))),
        _ => Err(AuthError::MalformedAuthHeader(
            "expected `Bearer <token>`".to_string(),
        )),
    }
}

/// Validates bearer tokens against discovered issuer and keys
pub struct TokenValidator {
    metadata: Arc<dyn MetadataSource>,
    keys: Arc<dyn KeySource>,
    resource: String,
    audience: String,
    verify_audience: bool,
    leeway: Duration,
    algorithms: Vec<Algorithm>,
    key_refresh_cooldown: Duration,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("resource", &self.resource)
            .field("audience", &self.audience)
            .field("verify_audience", &self.verify_audience)
            .field("leeway", &self.leeway)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Validator for tokens issued to `resource` (the client id)
    ///
    /// The expected audience defaults to `resource`.
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        keys: Arc<dyn KeySource>,
        resource: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        Self {
            metadata,
            keys,
            audience: resource.clone(),
            resource,
            verify_audience: true,
            leeway: Duration::ZERO,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
            key_refresh_cooldown: Duration::from_secs(30),
        }
    }

    /// Expect `audience` in `aud` instead of the client id
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Turn the `aud` check on or off
    #[must_use]
    pub fn with_audience_check(mut self, enabled: bool) -> Self {
        self.verify_audience = enabled;
        self
    }

    /// Clock skew tolerated on `exp`
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Restrict the accepted signature algorithms
    ///
    /// Symmetric algorithms are dropped from the list.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms
            .into_iter()
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        self
    }

    /// Minimum key set age before an unknown `kid` triggers a re-fetch
    #[must_use]
    pub fn with_key_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_refresh_cooldown = cooldown;
        self
    }

    /// Client id tokens are validated for
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Validate `raw` and return the token
    pub async fn validate(&self, raw: &str) -> Result<Token> {
        self.validate_inner(raw).await.inspect_err(|e| {
            if e.is_client_error() {
                warn!(error = %e, "Rejected bearer token");
            }
        })
    }

    async fn validate_inner(&self, raw: &str) -> Result<Token> {
        let header = jsonwebtoken::decode_header(raw)
            .map_err(|e| AuthError::InvalidSignature(format!("malformed token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidSignature(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let unverified = decode_payload(raw)?;
        check_expiry(&unverified, self.leeway, now_secs())?;

        let metadata = self.metadata.resolve().await?;
        let claims = self.verify_signature(raw, &header).await?;

        check_issuer(&claims, &metadata.issuer)?;
        if self.verify_audience {
            check_audience(&claims, &self.audience)?;
        }

        let sub = claims.get("sub").and_then(Value::as_str).unwrap_or_default();
        debug!(
            sub,
            kid = header.kid.as_deref().unwrap_or_default(),
            "Bearer token validated"
        );

        Ok(Token::new(header.alg, header.kid, claims, self.resource.clone()))
    }

    async fn verify_signature(&self, raw: &str, header: &Header) -> Result<Map<String, Value>> {
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::InvalidSignature("token header has no kid".to_string()))?;

        let keys = self.keys.keys().await?;
        let jwk = match keys.find(kid) {
            Some(jwk) => jwk.clone(),
            None => {
                debug!(kid, "Unknown kid, attempting key set refresh");
                self.keys
                    .refresh(self.key_refresh_cooldown)
                    .await?
                    .and_then(|fresh| fresh.find(kid).cloned())
                    .ok_or_else(|| {
                        AuthError::InvalidSignature(format!("no signing key with kid `{kid}`"))
                    })?
            }
        };

        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::InvalidSignature(format!("unusable signing key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<Map<String, Value>>(raw, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::InvalidSignature => {
                    AuthError::InvalidSignature("signature verification failed".to_string())
                }
                _ => AuthError::InvalidSignature(e.to_string()),
            })
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Decode the payload segment without verifying it
fn decode_payload(raw: &str) -> Result<Map<String, Value>> {
    let payload = raw
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidSignature("malformed token: no payload".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::InvalidSignature(format!("malformed token payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidSignature(format!("malformed token payload: {e}")))
}

/// Expired when `exp + leeway <= now`; a missing `exp` counts as expired
pub(crate) fn check_expiry(claims: &Map<String, Value>, leeway: Duration, now: u64) -> Result<()> {
    let exp = claims
        .get("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| AuthError::TokenExpired("missing exp".to_string()))?;

    let now = i64::try_from(now).unwrap_or(i64::MAX);
    let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
    if exp.saturating_add(leeway) <= now {
        return Err(AuthError::TokenExpired(format!("expired at {exp}")));
    }
    Ok(())
}

pub(crate) fn check_issuer(claims: &Map<String, Value>, expected: &str) -> Result<()> {
    let actual = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
    if actual == expected {
        Ok(())
    } else {
        Err(AuthError::InvalidIssuer {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// `aud` may be a single string or an array of strings
pub(crate) fn check_audience(claims: &Map<String, Value>, expected: &str) -> Result<()> {
    let contains = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected,
        Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(expected)),
        _ => false,
    };
    if contains {
        Ok(())
    } else {
        Err(AuthError::InvalidAudience {
            expected: expected.to_string(),
        })
    }
}
