//! Tower layers for authentication and policy enforcement

use std::sync::Arc;

use tower::Layer;

use crate::auth::Auth;
use crate::policy::Policy;

use super::AuthLayerConfig;
use super::service::{AuthService, RequireService};

/// Layer that authenticates requests with an [`Auth`]
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use psp_auth::middleware::AuthLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(AuthLayer::new(auth).bypass_path("/healthz"))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct AuthLayer {
    auth: Arc<Auth>,
    config: AuthLayerConfig,
}

impl AuthLayer {
    /// Create a layer with the default configuration
    pub fn new(auth: Arc<Auth>) -> Self {
        Self {
            auth,
            config: AuthLayerConfig::default(),
        }
    }

    /// Create a layer with a custom configuration
    pub fn with_config(auth: Arc<Auth>, config: AuthLayerConfig) -> Self {
        Self { auth, config }
    }

    /// Let requests without an `Authorization` header through
    #[must_use]
    pub fn allow_anonymous(mut self) -> Self {
        self.config.allow_anonymous = true;
        self
    }

    /// Skip authentication for `path`
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService::new(inner, Arc::clone(&self.auth), self.config.clone())
    }
}

/// Layer that enforces a [`Policy`] on authenticated requests
#[derive(Debug, Clone)]
pub struct RequireLayer {
    policy: Arc<Policy>,
}

impl RequireLayer {
    /// Enforce `policy`
    pub fn new(policy: impl Into<Policy>) -> Self {
        Self {
            policy: Arc::new(policy.into()),
        }
    }
}

impl<S> Layer<S> for RequireLayer {
    type Service = RequireService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireService::new(inner, Arc::clone(&self.policy))
    }
}
