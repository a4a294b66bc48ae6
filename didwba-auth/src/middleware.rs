//! Request boundary
//!
//! [`AuthMiddleware`] decides which paths need authentication and runs the
//! [`AuthenticationServer`] for the rest. [`did_wba_guard`] wires it into
//! actix-web via `middleware::from_fn`.

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::server::{AuthMethod, AuthOutcome, AuthRequest, AuthenticationServer};
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderValue, AUTHORIZATION, HOST};
use actix_web::middleware::Next;
use actix_web::{web, HttpMessage};
use regex::Regex;
use std::sync::Arc;

/// Path patterns that skip authentication
///
/// `*` and `?` are wildcards, a trailing `/` makes a prefix, `/` matches only
/// the root and anything else matches exactly.
#[derive(Debug, Clone)]
pub struct ExemptPaths {
    patterns: Vec<ExemptPattern>,
}

#[derive(Debug, Clone)]
enum ExemptPattern {
    Root,
    Exact(String),
    Prefix(String),
    Glob(Regex),
}

impl ExemptPaths {
    /// Compile patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| ExemptPattern::compile(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Check a request path
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

impl ExemptPattern {
    fn compile(pattern: &str) -> Result<Self> {
        if pattern == "/" {
            return Ok(ExemptPattern::Root);
        }

        if pattern.contains(['*', '?']) {
            let mut expr = String::from("^");
            for c in pattern.chars() {
                match c {
                    '*' => expr.push_str(".*"),
                    '?' => expr.push('.'),
                    other => expr.push_str(&regex::escape(&other.to_string())),
                }
            }
            expr.push('$');

            let regex = Regex::new(&expr).map_err(|e| {
                AuthError::Config(format!("invalid exempt path {}: {}", pattern, e))
            })?;
            return Ok(ExemptPattern::Glob(regex));
        }

        if pattern.ends_with('/') {
            return Ok(ExemptPattern::Prefix(pattern.to_string()));
        }

        Ok(ExemptPattern::Exact(pattern.to_string()))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            ExemptPattern::Root => path == "/",
            ExemptPattern::Exact(p) => path == p,
            ExemptPattern::Prefix(p) => path.starts_with(p.as_str()),
            ExemptPattern::Glob(regex) => regex.is_match(path),
        }
    }
}

/// Identity attached to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    /// Caller DID
    pub did: String,
    /// Local agent that accepted the caller
    pub agent_did: String,
    /// How the caller authenticated
    pub method: AuthMethod,
}

impl From<&AuthOutcome> for AuthenticatedIdentity {
    fn from(outcome: &AuthOutcome) -> Self {
        Self {
            did: outcome.caller_did.clone(),
            agent_did: outcome.agent_did.clone(),
            method: outcome.method,
        }
    }
}

/// Path-aware authentication in front of the handlers
pub struct AuthMiddleware {
    exempt: ExemptPaths,
    auth_path: String,
    server: Arc<AuthenticationServer>,
}

impl AuthMiddleware {
    /// Create a middleware from configuration
    pub fn new(config: &AuthConfig, server: Arc<AuthenticationServer>) -> Result<Self> {
        Ok(Self {
            exempt: ExemptPaths::new(&config.exempt_paths)?,
            auth_path: config.auth_path.clone(),
            server,
        })
    }

    /// Authentication server
    pub fn server(&self) -> &Arc<AuthenticationServer> {
        &self.server
    }

    /// Check whether a path skips authentication
    ///
    /// The handshake path is never exempt.
    pub fn is_exempt(&self, path: &str) -> bool {
        path != self.auth_path && self.exempt.matches(path)
    }

    /// Authenticate a request; `None` for exempt paths
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Option<AuthOutcome>> {
        if self.is_exempt(&request.path) {
            tracing::trace!(path = %request.path, "exempt from authentication");
            return Ok(None);
        }

        match self.server.authenticate(request).await {
            Ok(outcome) => Ok(Some(outcome)),
            // Anything outside the protocol taxonomy is reported as internal
            Err(e @ (AuthError::Config(_) | AuthError::Crypto(_) | AuthError::Http(_))) => {
                tracing::error!(path = %request.path, error = %e, "authentication failed internally");
                Err(AuthError::InternalError(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Build an [`AuthRequest`] from an actix request
pub fn auth_request(req: &ServiceRequest) -> AuthRequest {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let host = header(HOST.as_str()).unwrap_or_else(|| req.connection_info().host().to_string());

    AuthRequest {
        path: req.path().to_string(),
        host,
        authorization: header(AUTHORIZATION.as_str()),
        req_did: header("req_did"),
        resp_did: header("resp_did"),
    }
}

/// actix-web middleware function
///
/// Expects `web::Data<AuthMiddleware>` in app data. On success the caller's
/// [`AuthenticatedIdentity`] is inserted into request extensions and any
/// issued token is returned in the response `Authorization` header.
pub async fn did_wba_guard(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> std::result::Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let middleware = req
        .app_data::<web::Data<AuthMiddleware>>()
        .cloned()
        .ok_or_else(|| AuthError::InternalError("AuthMiddleware is not configured".to_string()))?;

    let request = auth_request(&req);
    let outcome = middleware.authenticate(&request).await?;

    if let Some(outcome) = &outcome {
        req.extensions_mut()
            .insert(AuthenticatedIdentity::from(outcome));
    }

    let mut response = next.call(req).await?;

    if let Some(value) = outcome.and_then(|o| o.response_header) {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AuthError::InternalError(format!("invalid response header: {}", e)))?;
        response.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(response)
}
