//! Caller-side authentication
//!
//! The client sends a cached bearer token when it holds one for the target
//! and a freshly signed DID header otherwise. A token returned by a two-way
//! handshake is only stored after the target's own proof has been verified.

use crate::agent::LocalAgent;
use crate::config::AuthConfig;
use crate::context::{parse_timestamp, AuthenticationContext};
use crate::did::did_host;
use crate::error::{AuthError, Result};
use crate::header::{self, BEARER_SCHEME};
use crate::resolver::DidResolver;
use crate::server::{check_timestamp, verify_against, AuthResponse};
use crate::signer;
use crate::token::Token;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the caller's DID
pub const REQ_DID_HEADER: &str = "req_did";

/// Header carrying the target's DID
pub const RESP_DID_HEADER: &str = "resp_did";

/// Authorization prepared for an outgoing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingAuth {
    /// Cached bearer token
    Bearer(String),
    /// Fresh DID-signature header
    Did {
        /// Header value
        header: String,
        /// Context it was signed for
        context: AuthenticationContext,
    },
}

impl OutgoingAuth {
    /// Header value
    pub fn header_value(&self) -> &str {
        match self {
            OutgoingAuth::Bearer(header) => header,
            OutgoingAuth::Did { header, .. } => header,
        }
    }

    /// Check if a cached token is being used
    pub fn is_bearer(&self) -> bool {
        matches!(self, OutgoingAuth::Bearer(_))
    }
}

/// Token response from a handshake, in any accepted shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthResponse {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds, when announced
    pub expires_in: Option<u64>,
    /// Target's own DID proof
    pub proof: Option<String>,
}

/// Response of [`AuthenticationClient::send`]
#[derive(Debug, Clone)]
pub struct ClientResponse {
    /// HTTP status
    pub status: u16,
    /// Response body
    pub body: String,
    /// Whether the final attempt used a cached token
    pub used_bearer: bool,
    /// Token stored from this response
    pub stored_token: Option<Token>,
}

impl ClientResponse {
    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Outgoing-call authenticator for one local agent
pub struct AuthenticationClient {
    agent: Arc<LocalAgent>,
    resolver: Arc<dyn DidResolver>,
    http: reqwest::Client,
    timestamp_freshness: Duration,
    token_ttl: Duration,
    use_two_way_auth: bool,
}

impl AuthenticationClient {
    /// Create a client
    pub fn new(
        agent: Arc<LocalAgent>,
        resolver: Arc<dyn DidResolver>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.resolver.request_timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            agent,
            resolver,
            http,
            timestamp_freshness: config.timestamp_freshness,
            token_ttl: config.token_ttl,
            use_two_way_auth: true,
        })
    }

    /// Request or skip the target's reciprocal proof
    pub fn with_two_way_auth(mut self, enabled: bool) -> Self {
        self.use_two_way_auth = enabled;
        self
    }

    /// Calling agent
    pub fn agent(&self) -> &Arc<LocalAgent> {
        &self.agent
    }

    /// Authorization for a call: cached token first, DID signature otherwise
    pub fn authorization(&self, target_did: &str, url: &str, method: &str) -> Result<OutgoingAuth> {
        if let Some(token) = self.agent.tokens().received_token(target_did) {
            tracing::debug!(peer = %target_did, "using cached bearer token");
            return Ok(OutgoingAuth::Bearer(format!("{} {}", BEARER_SCHEME, token.token)));
        }
        self.did_authorization(target_did, url, method)
    }

    /// Freshly signed DID header
    pub fn did_authorization(
        &self,
        target_did: &str,
        url: &str,
        method: &str,
    ) -> Result<OutgoingAuth> {
        let context = AuthenticationContext::new(
            self.agent.did(),
            target_did,
            url,
            method,
            self.use_two_way_auth,
        )?;
        let header = header::encode_signed(&context, self.agent.signing_key());
        Ok(OutgoingAuth::Did { header, context })
    }

    /// Forget the token received from a target
    pub fn clear_token(&self, target_did: &str) -> bool {
        self.agent.tokens().clear_received(target_did)
    }

    /// Process the `Authorization` header of a handshake response
    ///
    /// Verifies the target's proof when present (and requires it for two-way
    /// calls), then stores the token.
    pub async fn handle_response(&self, target_did: &str, response_header: &str) -> Result<Token> {
        let now = Utc::now();
        let parsed = parse_auth_response(response_header)?;

        match &parsed.proof {
            Some(proof) => self.verify_reciprocal_at(target_did, proof, now).await?,
            None if self.use_two_way_auth => {
                return Err(AuthError::InvalidSignature(format!(
                    "{} returned no identity proof",
                    target_did
                )));
            }
            None => {}
        }

        let ttl = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.token_ttl);
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::InternalError(format!("token lifetime out of range: {}", e)))?;

        Ok(self
            .agent
            .tokens()
            .store_received(target_did, parsed.access_token, now, now + ttl))
    }

    /// Verify the proof a target returned about itself
    pub async fn verify_reciprocal(&self, target_did: &str, proof: &str) -> Result<()> {
        self.verify_reciprocal_at(target_did, proof, Utc::now()).await
    }

    async fn verify_reciprocal_at(
        &self,
        target_did: &str,
        proof: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let parts = header::decode(proof)?;

        if parts.did != target_did {
            return Err(AuthError::InvalidSignature(format!(
                "proof signed by {} instead of {}",
                parts.did, target_did
            )));
        }
        if parts.resp_did.as_deref() != Some(self.agent.did()) {
            return Err(AuthError::InvalidSignature(
                "proof is not addressed to this agent".to_string(),
            ));
        }

        check_timestamp(parse_timestamp(&parts.timestamp)?, now, self.timestamp_freshness)?;

        let domain = did_host(self.agent.did())?;
        let payload = signer::canonical_payload(&parts.signed_fields(&domain));

        let document = self.resolver.resolve(target_did).await?;
        if let Err(first) = verify_against(&document, &parts, &payload) {
            // A rotated key may be missing from a cached document
            let fresh = self.resolver.resolve_fresh(target_did).await?;
            if fresh == document {
                return Err(first);
            }
            tracing::debug!(peer = %target_did, "retrying proof with freshly resolved document");
            verify_against(&fresh, &parts, &payload)?;
        }

        tracing::debug!(peer = %target_did, "target proof verified");
        Ok(())
    }

    /// Send an authenticated request
    ///
    /// Only GET and POST are sent. A 401 answer to a cached token clears it
    /// and the call is retried once with a DID signature.
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        target_did: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ClientResponse> {
        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => return Err(AuthError::UnsupportedHttpMethod(other.to_string())),
        };

        let auth = self.authorization(target_did, url, method.as_str())?;
        let mut response = self.dispatch(&method, url, target_did, &auth, body).await?;

        if response.status == 401 && auth.is_bearer() {
            tracing::warn!(peer = %target_did, "cached token rejected, retrying with DID signature");
            self.clear_token(target_did);

            let auth = self.did_authorization(target_did, url, method.as_str())?;
            response = self.dispatch(&method, url, target_did, &auth, body).await?;
        }

        Ok(response)
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        target_did: &str,
        auth: &OutgoingAuth,
        body: Option<&serde_json::Value>,
    ) -> Result<ClientResponse> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(auth.header_value())?);
        headers.insert(REQ_DID_HEADER, header_value(self.agent.did())?);
        headers.insert(RESP_DID_HEADER, header_value(target_did)?);

        let mut request = self.http.request(method.clone(), url).headers(headers);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let returned_auth = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        let mut stored_token = None;
        if (200..300).contains(&status) && !auth.is_bearer() {
            if let Some(returned) = returned_auth {
                stored_token = Some(self.handle_response(target_did, &returned).await?);
            }
        }

        Ok(ClientResponse {
            status,
            body,
            used_bearer: auth.is_bearer(),
            stored_token,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AuthError::InternalError(format!("invalid header value: {}", e)))
}

/// Parse a handshake response header
///
/// Accepts `Bearer <token>`, the JSON response object, or a JSON array
/// holding one such object.
pub fn parse_auth_response(value: &str) -> Result<ParsedAuthResponse> {
    let value = value.trim();

    if let Some((scheme, token)) = value.split_once(char::is_whitespace) {
        if scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return Ok(ParsedAuthResponse {
                access_token: token.trim().to_string(),
                expires_in: None,
                proof: None,
            });
        }
    }

    let json: serde_json::Value = serde_json::from_str(value).map_err(|e| {
        AuthError::MalformedHeader(format!("unrecognized authentication response: {}", e))
    })?;

    let object = match json {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        serde_json::Value::Object(_) => json,
        _ => {
            return Err(AuthError::MalformedHeader(
                "authentication response is neither an object nor a list".to_string(),
            ))
        }
    };

    let response: AuthResponse = serde_json::from_value(object)
        .map_err(|e| AuthError::MalformedHeader(format!("invalid authentication response: {}", e)))?;

    if !response.token_type.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader(format!(
            "unsupported token type {}",
            response.token_type
        )));
    }

    Ok(ParsedAuthResponse {
        access_token: response.access_token,
        expires_in: response.expires_in,
        proof: response.resp_did_auth_header.map(|h| h.authorization),
    })
}
