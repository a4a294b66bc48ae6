//! Configuration for DID-WBA authentication

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    /// Path patterns that skip authentication entirely
    ///
    /// Supports `*`/`?` wildcards and trailing-slash prefixes. `/` only
    /// matches the literal root.
    #[serde(default = "AuthConfig::default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Handshake endpoint, never exempt
    #[serde(default = "AuthConfig::default_auth_path")]
    #[validate(custom(function = "validate_absolute_path"))]
    pub auth_path: String,

    /// How long a nonce is remembered
    #[serde(default = "AuthConfig::default_window", with = "humantime_serde")]
    #[validate(custom(function = "validate_positive"))]
    pub nonce_replay_window: Duration,

    /// Accepted distance between request timestamp and server clock
    #[serde(default = "AuthConfig::default_window", with = "humantime_serde")]
    #[validate(custom(function = "validate_positive"))]
    pub timestamp_freshness: Duration,

    /// Lifetime of issued bearer tokens
    #[serde(default = "AuthConfig::default_token_ttl", with = "humantime_serde")]
    #[validate(custom(function = "validate_positive"))]
    pub token_ttl: Duration,

    /// Signature algorithm for DID proofs
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,

    /// DID resolution settings
    #[serde(default)]
    #[validate(nested)]
    pub resolver: ResolverConfig,

    /// Agent host settings (binary only)
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            exempt_paths: Self::default_exempt_paths(),
            auth_path: Self::default_auth_path(),
            nonce_replay_window: Self::default_window(),
            timestamp_freshness: Self::default_window(),
            token_ttl: Self::default_token_ttl(),
            signature_algorithm: SignatureAlgorithm::default(),
            resolver: ResolverConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults. Environment overrides are applied
    /// afterwards and the result is validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AuthError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml(&content)?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.check()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AuthError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate field constraints
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AuthError::Config(format!("Invalid configuration: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("DIDWBA_BIND_ADDR") {
            self.server.bind_address = addr;
        }
        if let Ok(dir) = std::env::var("DIDWBA_CREDENTIALS_DIR") {
            self.server.credentials_dir = PathBuf::from(dir);
        }
    }

    fn default_exempt_paths() -> Vec<String> {
        [
            "/docs",
            "/anp-nlp/",
            "/ws/",
            "/publisher/agents",
            "/agent/group/*",
            "/redoc",
            "/openapi.json",
            "/wba/hostuser/*",
            "/wba/user/*",
            "/",
            "/favicon.ico",
            "/agents/example/ad.json",
            "/health",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect()
    }

    fn default_auth_path() -> String {
        "/wba/auth".to_string()
    }

    fn default_window() -> Duration {
        Duration::from_secs(crate::DEFAULT_WINDOW_SECS)
    }

    fn default_token_ttl() -> Duration {
        Duration::from_secs(crate::DEFAULT_TOKEN_TTL_SECS)
    }
}

/// Signature algorithm
///
/// Only Ed25519 is accepted; a configuration naming any other curve fails
/// to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// Ed25519 over the SHA-256 digest of the canonical payload
    #[default]
    Ed25519,
}

/// DID resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolverConfig {
    /// How long a resolved document may be served from cache
    #[serde(default = "ResolverConfig::default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// URL scheme used for remote DID documents
    #[serde(default)]
    pub remote_scheme: RemoteScheme,

    /// Timeout for a remote document fetch
    #[serde(
        default = "ResolverConfig::default_request_timeout",
        with = "humantime_serde"
    )]
    #[validate(custom(function = "validate_positive"))]
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Self::default_cache_ttl(),
            remote_scheme: RemoteScheme::default(),
            request_timeout: Self::default_request_timeout(),
        }
    }
}

impl ResolverConfig {
    fn default_cache_ttl() -> Duration {
        Duration::from_secs(crate::DEFAULT_WINDOW_SECS)
    }

    fn default_request_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

/// URL scheme for remote resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteScheme {
    /// Plain HTTP, for local development
    Http,
    /// HTTPS
    #[default]
    Https,
}

impl RemoteScheme {
    /// Scheme string used in URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteScheme::Http => "http",
            RemoteScheme::Https => "https",
        }
    }
}

/// Agent host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP server
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: String,

    /// Directory holding one credential bundle per local agent
    #[serde(default = "ServerConfig::default_credentials_dir")]
    pub credentials_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            credentials_dir: Self::default_credentials_dir(),
        }
    }
}

impl ServerConfig {
    fn default_bind_address() -> String {
        "127.0.0.1:9527".to_string()
    }

    fn default_credentials_dir() -> PathBuf {
        PathBuf::from("./user_data")
    }
}

fn validate_positive(value: &Duration) -> std::result::Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

fn validate_absolute_path(value: &str) -> std::result::Result<(), ValidationError> {
    if !value.starts_with('/') {
        return Err(ValidationError::new("must_start_with_slash"));
    }
    Ok(())
}
