//! Timeout-bounded HTTP client shared by the upstream fetchers

use crate::config::{ConfigError, TimeoutConfig};

/// Build the client used for discovery, key set and introspection calls
///
/// Redirects are not followed: discovery and key documents must be served
/// from the configured location.
pub(crate) fn build_client(timeouts: &TimeoutConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("psp-auth/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Render a reqwest failure for an error message
pub(crate) fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}
