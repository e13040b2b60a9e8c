//! Error taxonomy for token validation and authorization
//!
//! Every failure the core can produce is a distinct [`AuthError`] variant. Variants
//! fall into three [`ErrorKind`]s which map onto HTTP status classes:
//!
//! | Kind | Status | Variants |
//! |------|--------|----------|
//! | [`ErrorKind::Unauthenticated`] | 401 | header, signature, issuer, audience, expiry, inactive |
//! | [`ErrorKind::Upstream`] | 502 | discovery, key fetch, introspection |
//! | [`ErrorKind::Forbidden`] | 403 | insufficient scope / role |
//!
//! `AuthError` is `Clone` because one failed upstream fetch is handed to every
//! caller waiting on it.

use http::StatusCode;
use thiserror::Error;

/// Result type alias for the auth core
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication and authorization failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The request carried no `Authorization` header
    #[error("missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header is not `Bearer <token>`
    #[error("malformed Authorization header: {0}")]
    MalformedAuthHeader(String),

    /// Discovery metadata could not be fetched or parsed
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// The signing key set could not be fetched or parsed
    #[error("key set fetch failed: {0}")]
    KeyFetch(String),

    /// The introspection endpoint failed for a reason other than credentials
    #[error("introspection request failed: {0}")]
    IntrospectionHttp(String),

    /// The introspection endpoint rejected this service's client credentials
    #[error("introspection endpoint rejected client credentials (HTTP {status})")]
    IntrospectionAuth {
        /// HTTP status returned by the endpoint (401 or 403)
        status: u16,
    },

    /// Token could not be decoded or its signature does not verify
    #[error("invalid token signature: {0}")]
    InvalidSignature(String),

    /// `iss` does not match the resolved issuer
    #[error("the issuer is not {expected} (token issuer: {actual})")]
    InvalidIssuer {
        /// Issuer advertised by discovery
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// `aud` does not contain the expected audience
    #[error("the audience does not contain {expected}")]
    InvalidAudience {
        /// The configured audience value
        expected: String,
    },

    /// `exp` is not in the future
    #[error("token expired: {0}")]
    TokenExpired(String),

    /// Introspection reports the token as no longer active
    #[error("token is not active")]
    TokenInactive,

    /// A required scope is absent from the token
    #[error("missing required scope `{scope}`")]
    InsufficientScope {
        /// First missing scope, as compared (namespaced when applicable)
        scope: String,
    },

    /// A required role is absent from the token
    #[error("missing required role(s) {roles:?} on `{resource}`")]
    InsufficientRole {
        /// Resource the role was required on (`global` for realm roles)
        resource: String,
        /// Role(s) that failed the check
        roles: Vec<String>,
    },
}

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller is not authenticated (401)
    Unauthenticated,
    /// The caller is authenticated but not allowed (403)
    Forbidden,
    /// The auth core cannot currently reach the identity provider (502)
    Upstream,
}

impl AuthError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingAuthHeader
            | Self::MalformedAuthHeader(_)
            | Self::InvalidSignature(_)
            | Self::InvalidIssuer { .. }
            | Self::InvalidAudience { .. }
            | Self::TokenExpired(_)
            | Self::TokenInactive => ErrorKind::Unauthenticated,
            Self::Discovery(_)
            | Self::KeyFetch(_)
            | Self::IntrospectionHttp(_)
            | Self::IntrospectionAuth { .. } => ErrorKind::Upstream,
            Self::InsufficientScope { .. } | Self::InsufficientRole { .. } => ErrorKind::Forbidden,
        }
    }

    /// HTTP status a host framework should answer with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message that is safe to send to an untrusted client
    ///
    /// 401 and 502 responses are generic. 403 responses name the missing
    /// scope or role since the caller is already authenticated.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unauthenticated => "authentication failed".to_string(),
            ErrorKind::Upstream => "authentication service unavailable".to_string(),
            ErrorKind::Forbidden => self.to_string(),
        }
    }

    /// `true` for errors raised because of the presented token or header
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Upstream
    }
}
