//! Error types for DID-WBA authentication

use actix_web::{http::StatusCode, HttpResponse};

/// Result type for DID-WBA operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// DID-WBA authentication errors
///
/// Every rejected request is classified into exactly one of the protocol
/// variants. `Config`, `Crypto` and `Http` come from setup and client-side
/// plumbing; on the request path they surface as internal errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No Authorization header on a protected path
    #[error("Missing authorization header")]
    MissingHeader,

    /// Authorization header could not be parsed
    #[error("Malformed authorization header: {0}")]
    MalformedHeader(String),

    /// Request timestamp is outside the freshness window
    #[error("Timestamp expired: {0}")]
    TimestampExpired(String),

    /// Nonce was already presented within the replay window
    #[error("Replayed nonce: {0}")]
    ReplayedNonce(String),

    /// DID document could not be resolved
    #[error("Unresolvable DID: {0}")]
    UnresolvableDid(String),

    /// Signature did not verify against the resolved key
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// No bearer token known for the presenting holder
    #[error("Token not found for {0}")]
    TokenNotFound(String),

    /// Bearer token was revoked by its issuer
    #[error("Token has been revoked for {0}")]
    TokenRevoked(String),

    /// Bearer token is past its expiry
    #[error("Token has expired for {0}")]
    TokenExpired(String),

    /// Presented token differs from the stored one
    #[error("Token mismatch for {0}")]
    TokenMismatch(String),

    /// Client asked for an HTTP method the request helper does not send
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedHttpMethod(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key material or signing failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Outgoing HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Check if a fresh DID-signature handshake may succeed where this failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::TokenNotFound(_)
                | AuthError::TokenRevoked(_)
                | AuthError::TokenExpired(_)
                | AuthError::TokenMismatch(_)
                | AuthError::ReplayedNonce(_)
                | AuthError::TimestampExpired(_)
        )
    }

    /// Check if this error comes from a bearer token rejection
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::TokenNotFound(_)
                | AuthError::TokenRevoked(_)
                | AuthError::TokenExpired(_)
                | AuthError::TokenMismatch(_)
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingHeader => 401,
            AuthError::MalformedHeader(_) => 401,
            AuthError::TimestampExpired(_) => 401,
            AuthError::ReplayedNonce(_) => 401,
            AuthError::UnresolvableDid(_) => 401,
            AuthError::InvalidSignature(_) => 401,
            AuthError::TokenNotFound(_) => 401,
            AuthError::TokenRevoked(_) => 401,
            AuthError::TokenExpired(_) => 401,
            AuthError::TokenMismatch(_) => 401,
            AuthError::UnsupportedHttpMethod(_) => 400,
            AuthError::Config(_) => 500,
            AuthError::Crypto(_) => 500,
            AuthError::Http(_) => 500,
            AuthError::InternalError(_) => 500,
        }
    }

    /// Short machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::MalformedHeader(_) => "malformed_header",
            AuthError::TimestampExpired(_) => "timestamp_expired",
            AuthError::ReplayedNonce(_) => "replayed_nonce",
            AuthError::UnresolvableDid(_) => "unresolvable_did",
            AuthError::InvalidSignature(_) => "invalid_signature",
            AuthError::TokenNotFound(_) => "token_not_found",
            AuthError::TokenRevoked(_) => "token_revoked",
            AuthError::TokenExpired(_) => "token_expired",
            AuthError::TokenMismatch(_) => "token_mismatch",
            AuthError::UnsupportedHttpMethod(_) => "unsupported_http_method",
            AuthError::Config(_)
            | AuthError::Crypto(_)
            | AuthError::Http(_)
            | AuthError::InternalError(_) => "internal_error",
        }
    }
}

impl actix_web::error::ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AuthError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = actix_web::error::ResponseError::status_code(self);

        if status.is_server_error() {
            tracing::error!(error = %self, "internal error during authentication");
            return HttpResponse::build(status).json(serde_json::json!({
                "detail": "Internal server error",
            }));
        }

        HttpResponse::build(status).json(serde_json::json!({
            "detail": self.to_string(),
            "code": self.code(),
        }))
    }
}

// Conversions from common error types
impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::InternalError(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Http(err.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::InternalError(format!("I/O error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::Crypto(format!("JWT error: {}", err))
    }
}
