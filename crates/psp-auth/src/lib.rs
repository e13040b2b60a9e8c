//! # psp-auth - Bearer Token Authentication for PSP Services
//!
//! Validates OpenID Connect / OAuth 2.0 bearer access tokens (JWTs) issued by
//! the platform identity provider and exposes role and scope based access
//! control to route handlers.
//!
//! ## Design Principles
//!
//! - **Discovery-driven**: issuer, key set and endpoints come from the provider's
//!   discovery document; only its URL and the client id are configured
//! - **Explicit ownership**: every cache belongs to an [`Auth`] instance, there is
//!   no process-wide state
//! - **One fetch per miss**: concurrent requests on a cold cache share one
//!   upstream call
//! - **Pure authorization**: scope and role checks do no I/O
//!
//! ## Architecture
//!
//! - [`discovery`] - Discovery metadata resolution ([`MetadataSource`])
//! - [`jwks`] - Signing key set fetching ([`KeySource`])
//! - [`validator`] - Signature and claim validation ([`TokenValidator`])
//! - [`introspection`] - RFC 7662 revocation check
//! - [`token`] / [`user`] - Read-only claims view
//! - [`policy`] - Role and scope requirements
//! - [`auth`] - The [`Auth`] facade tying them together
//! - [`config`] - [`AuthConfig`] and file loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use psp_auth::{Auth, AuthConfig, Policy, Requirement};
//!
//! # async fn example(authorization: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::builder(
//!     "https://idp.example/realms/psp/.well-known/openid-configuration",
//!     "myclient",
//! )
//! .client_secret("s3cret")
//! .build()?;
//! let auth = Auth::new(config)?;
//!
//! let policy = Policy::new()
//!     .require(Requirement::scopes(["read"]))
//!     .require(Requirement::resource_role("myclient", "reader"));
//!
//! let token = auth.authorize(authorization, &policy).await?;
//! println!("hello {}", token.user().username().unwrap_or("anonymous"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` - Tower [`AuthLayer`](middleware::AuthLayer) and
//!   [`RequireLayer`](middleware::RequireLayer)
//! - `testing` - In-memory identity provider for host test suites
//! - `full` - All features enabled

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub(crate) mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub(crate) mod http_client;
pub mod introspection;
pub mod jwks;
pub mod policy;
pub mod token;
pub mod user;
pub mod validator;

#[cfg(feature = "middleware")]
#[cfg_attr(docsrs, doc(cfg(feature = "middleware")))]
pub mod middleware;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[doc(inline)]
pub use auth::Auth;
#[doc(inline)]
pub use config::{
    AuthConfig, AuthConfigBuilder, CacheConfig, ConfigError, IntrospectionMode, TimeoutConfig,
};
#[doc(inline)]
pub use discovery::{DiscoveryClient, Metadata, MetadataSource, StaticMetadata};
#[doc(inline)]
pub use error::{AuthError, ErrorKind, Result};
#[doc(inline)]
pub use introspection::{IntrospectionClient, IntrospectionResponse};
#[doc(inline)]
pub use jwks::{JwksClient, KeySet, KeySource, StaticKeys};
#[doc(inline)]
pub use policy::{Policy, Requirement};
#[doc(inline)]
pub use token::Token;
#[doc(inline)]
pub use user::{Resource, RoleRef, User};
#[doc(inline)]
pub use validator::{TokenValidator, extract_bearer};
