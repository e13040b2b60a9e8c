//! Tower services behind [`AuthLayer`](super::AuthLayer) and [`RequireLayer`](super::RequireLayer)
//!
//! Both services answer authentication failures with a response built by
//! [`error_response`], so the inner service's error type passes through
//! untouched and hosts don't need an error-mapping layer.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower_service::Service;
use tracing::debug;

use crate::auth::Auth;
use crate::error::AuthError;
use crate::policy::Policy;
use crate::token::Token;

use super::{AuthLayerConfig, error_response};

/// Future type for auth service responses
pub type AuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Service that authenticates requests and stores the [`Token`] in extensions
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    auth: Arc<Auth>,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    /// Create a new auth service
    pub fn new(inner: S, auth: Arc<Auth>, config: AuthLayerConfig) -> Self {
        Self {
            inner,
            auth,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let header = match req.headers().get(&self.config.auth_header) {
            None => None,
            Some(value) => match value.to_str() {
                Ok(value) => Some(value.to_owned()),
                Err(_) => {
                    let err = AuthError::MalformedAuthHeader(
                        "header contains non-ASCII characters".to_string(),
                    );
                    return Box::pin(async move { Ok(error_response(&err)) });
                }
            },
        };

        let auth = Arc::clone(&self.auth);
        let allow_anonymous = self.config.allow_anonymous;

        Box::pin(async move {
            match auth.authenticate(header.as_deref()).await {
                Ok(token) => {
                    req.extensions_mut().insert(token);
                    inner.call(req).await
                }
                Err(AuthError::MissingAuthHeader) if allow_anonymous => {
                    debug!(path = %req.uri().path(), "Anonymous request passed through");
                    inner.call(req).await
                }
                Err(e) => Ok(error_response(&e)),
            }
        })
    }
}

/// Service that checks a [`Policy`] against the request's [`Token`]
#[derive(Debug, Clone)]
pub struct RequireService<S> {
    inner: S,
    policy: Arc<Policy>,
}

impl<S> RequireService<S> {
    /// Create a new policy service
    pub fn new(inner: S, policy: Arc<Policy>) -> Self {
        Self { inner, policy }
    }
}

impl<S, B, ResBody> Service<http::Request<B>> for RequireService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let verdict = match req.extensions().get::<Token>() {
            // No AuthLayer ran, or it let an anonymous request through
            None => Err(AuthError::MissingAuthHeader),
            Some(token) => self.policy.check(token),
        };

        if let Err(e) = verdict {
            debug!(path = %req.uri().path(), error = %e, "Request denied by policy");
            return Box::pin(async move { Ok(error_response(&e)) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(req))
    }
}
