//! Auth configuration
//!
//! [`AuthConfig`] is immutable once an [`Auth`](crate::Auth) is built from it. It
//! can be constructed programmatically with [`AuthConfig::builder`], deserialized
//! with serde, or loaded from a file with environment overrides via
//! [`AuthConfig::from_file`].

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default environment variable prefix for [`AuthConfig::from_file`]
pub const DEFAULT_ENV_PREFIX: &str = "PSP_AUTH";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value is present but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Whether [`Auth::authenticate`](crate::Auth::authenticate) also asks the
/// authorization server if the token is still active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrospectionMode {
    /// Local validation only
    #[default]
    Disabled,
    /// Local validation followed by token introspection
    Required,
}

/// Network timeouts applied to every outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// TCP/TLS connect timeout
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect: Duration,
    /// Timeout for reading the response
    #[serde(default = "default_read_timeout", with = "duration_secs")]
    pub read: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            read: default_read_timeout(),
        }
    }
}

/// Cache lifetimes for discovery metadata and the signing key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long resolved discovery metadata stays fresh
    #[serde(default = "default_ttl", with = "duration_secs")]
    pub metadata_ttl: Duration,
    /// How long a fetched key set stays fresh
    #[serde(default = "default_ttl", with = "duration_secs")]
    pub keys_ttl: Duration,
    /// Minimum key set age before an unknown `kid` triggers a re-fetch
    #[serde(default = "default_key_refresh_cooldown", with = "duration_secs")]
    pub key_refresh_cooldown: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_ttl: default_ttl(),
            keys_ttl: default_ttl(),
            key_refresh_cooldown: default_key_refresh_cooldown(),
        }
    }
}

/// Auth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OpenID Connect discovery document URL
    pub discovery_url: String,
    /// This service's client id; also the namespace for scopes and resource roles
    pub client_id: String,
    /// Expected `aud` value when it differs from `client_id`
    #[serde(default)]
    pub audience: Option<String>,
    /// Client secret used to authenticate introspection calls
    #[serde(
        default = "empty_secret",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
    /// Outbound network timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Metadata / key set cache lifetimes
    #[serde(default)]
    pub cache: CacheConfig,
    /// Clock skew tolerated when checking `exp`
    #[serde(default, with = "duration_secs")]
    pub leeway: Duration,
    /// Require `aud` to contain the expected audience
    #[serde(default = "default_true")]
    pub verify_audience: bool,
    /// Default for scope requirements: prefix required scopes with `"<client_id>:"`
    #[serde(default = "default_true")]
    pub namespaced_scopes: bool,
    /// Whether authentication also performs token introspection
    #[serde(default)]
    pub introspection: IntrospectionMode,
}

// Custom serialization for SecretString
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_key_refresh_cooldown() -> Duration {
    Duration::from_secs(30)
}

/// Durations are written as whole seconds in config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl AuthConfig {
    /// Create a configuration with defaults for everything but the two required values
    pub fn new(discovery_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            client_id: client_id.into(),
            audience: None,
            client_secret: empty_secret(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            leeway: Duration::ZERO,
            verify_audience: true,
            namespaced_scopes: true,
            introspection: IntrospectionMode::Disabled,
        }
    }

    /// Create a configuration builder
    ///
    /// # Example
    ///
    /// ```rust
    /// use psp_auth::AuthConfig;
    /// use std::time::Duration;
    ///
    /// let config = AuthConfig::builder(
    ///     "https://idp.example/.well-known/openid-configuration",
    ///     "myclient",
    /// )
    /// .client_secret("s3cret")
    /// .leeway(Duration::from_secs(30))
    /// .build()
    /// .unwrap();
    ///
    /// assert_eq!(config.expected_audience(), "myclient");
    /// ```
    pub fn builder(
        discovery_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> AuthConfigBuilder {
        AuthConfigBuilder {
            config: Self::new(discovery_url, client_id),
        }
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension. Environment
    /// variables with the `PSP_AUTH_` prefix override file settings, using `__`
    /// for nesting (e.g. `PSP_AUTH_TIMEOUTS__READ=10`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, its format is unsupported,
    /// it can't be parsed, or the resulting configuration fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn from_file_with_prefix(
        path: impl AsRef<std::path::Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let settings = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty or unparsable discovery URL,
    /// an empty client id, or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_url.trim().is_empty() {
            return Err(ConfigError::Invalid("discovery_url is empty".to_string()));
        }
        url::Url::parse(&self.discovery_url).map_err(|e| {
            ConfigError::Invalid(format!("discovery_url `{}`: {e}", self.discovery_url))
        })?;
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id is empty".to_string()));
        }
        if self.timeouts.connect.is_zero() || self.timeouts.read.is_zero() {
            return Err(ConfigError::Invalid(
                "network timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The `aud` value tokens must carry
    #[must_use]
    pub fn expected_audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.client_id)
    }
}

/// Builder for [`AuthConfig`]
#[derive(Debug, Clone)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Expect an `aud` value other than the client id
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.config.audience = Some(audience.into());
        self
    }

    /// Client secret for introspection
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = SecretString::new(secret.into());
        self
    }

    /// Connect and read timeouts
    #[must_use]
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.config.timeouts = TimeoutConfig { connect, read };
        self
    }

    /// Metadata cache lifetime
    #[must_use]
    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.metadata_ttl = ttl;
        self
    }

    /// Key set cache lifetime
    #[must_use]
    pub fn keys_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.keys_ttl = ttl;
        self
    }

    /// Minimum key set age before an unknown `kid` forces a re-fetch
    #[must_use]
    pub fn key_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cache.key_refresh_cooldown = cooldown;
        self
    }

    /// Clock skew tolerance for `exp`
    #[must_use]
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.config.leeway = leeway;
        self
    }

    /// Toggle the audience check
    #[must_use]
    pub fn verify_audience(mut self, enabled: bool) -> Self {
        self.config.verify_audience = enabled;
        self
    }

    /// Default namespacing for scope requirements
    #[must_use]
    pub fn namespaced_scopes(mut self, enabled: bool) -> Self {
        self.config.namespaced_scopes = enabled;
        self
    }

    /// Introspection mode for [`Auth::authenticate`](crate::Auth::authenticate)
    #[must_use]
    pub fn introspection(mut self, mode: IntrospectionMode) -> Self {
        self.config.introspection = mode;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// See [`AuthConfig::validate`].
    pub fn build(self) -> Result<AuthConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
