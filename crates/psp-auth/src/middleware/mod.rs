//! # Tower middleware
//!
//! - [`AuthLayer`] authenticates the `Authorization` header with an [`Auth`](crate::Auth),
//!   inserts the validated [`Token`](crate::Token) into the request extensions and
//!   answers 401/502 itself when authentication fails.
//! - [`RequireLayer`] enforces a [`Policy`](crate::Policy) on a request that
//!   already went through `AuthLayer`, answering 403 on denial.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::get};
//! use psp_auth::middleware::{AuthLayer, RequireLayer};
//! use psp_auth::{Auth, AuthConfig, Policy, Requirement};
//!
//! let auth = Arc::new(Auth::new(AuthConfig::from_file("auth.toml")?)?);
//!
//! let app = Router::new()
//!     .route("/items", get(list_items))
//!     .route_layer(RequireLayer::new(Policy::from(Requirement::scopes(["read"]))))
//!     .layer(AuthLayer::new(auth));
//! ```
//!
//! Handlers read the token from the extensions:
//!
//! ```rust,ignore
//! async fn list_items(Extension(token): Extension<Token>) -> String {
//!     token.user().username().unwrap_or_default().to_string()
//! }
//! ```

mod layer;
mod service;

use http::header::{self, HeaderName, HeaderValue};

pub use layer::{AuthLayer, RequireLayer};
pub use service::{AuthService, AuthServiceFuture, RequireService};

use crate::error::{AuthError, ErrorKind};

/// Configuration for the auth layer
#[derive(Debug, Clone)]
pub struct AuthLayerConfig {
    /// Pass requests without an `Authorization` header through unauthenticated
    ///
    /// A header that is present but invalid is still rejected.
    pub allow_anonymous: bool,
    /// Request paths that skip authentication entirely (e.g. `/healthz`)
    pub bypass_paths: Vec<String>,
    /// Header to read the bearer token from (default: `Authorization`)
    pub auth_header: HeaderName,
}

impl Default for AuthLayerConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            bypass_paths: Vec::new(),
            auth_header: header::AUTHORIZATION,
        }
    }
}

impl AuthLayerConfig {
    /// Configuration that lets anonymous requests through
    pub fn allow_anonymous() -> Self {
        Self {
            allow_anonymous: true,
            ..Default::default()
        }
    }

    /// Whether `path` skips authentication
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}

/// Build the HTTP response for a failed authentication or authorization
///
/// The body is JSON `{"error": ..., "error_description": ...}` carrying only
/// [`AuthError::public_message`]. 401 and 403 responses carry a
/// `WWW-Authenticate: Bearer` challenge.
pub fn error_response<B: From<String>>(err: &AuthError) -> http::Response<B> {
    let code = match err.kind() {
        ErrorKind::Unauthenticated => "invalid_token",
        ErrorKind::Forbidden => "insufficient_scope",
        ErrorKind::Upstream => "temporarily_unavailable",
    };
    let body = serde_json::json!({
        "error": code,
        "error_description": err.public_message(),
    })
    .to_string();

    let mut response = http::Response::new(B::from(body));
    *response.status_mut() = err.status_code();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let challenge = match err {
        AuthError::MissingAuthHeader => Some("Bearer"),
        _ => match err.kind() {
            ErrorKind::Unauthenticated => Some(r#"Bearer error="invalid_token""#),
            ErrorKind::Forbidden => Some(r#"Bearer error="insufficient_scope""#),
            ErrorKind::Upstream => None,
        },
    };
    if let Some(challenge) = challenge {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }

    response
}
