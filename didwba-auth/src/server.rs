//! Request-side verification
//!
//! A DID-signature request moves through
//! `Received → Parsed → TimestampOk → NonceOk → DidResolved → SignatureOk → Accepted`
//! and can be rejected at any stage. Bearer requests are checked against the
//! token tables of the addressed local agent.

use crate::agent::{AgentRegistry, LocalAgent};
use crate::config::AuthConfig;
use crate::context::{parse_timestamp, AuthenticationContext};
use crate::did::{did_host, DidDocument};
use crate::error::{AuthError, Result};
use crate::header::{self, AuthHeaderParts, AuthorizationKind};
use crate::nonce::NonceStore;
use crate::resolver::DidResolver;
use crate::signer;
use crate::token::{fingerprint, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Verification stages of a DID-signature request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    /// Header extracted
    Received,
    /// Header decoded
    Parsed,
    /// Timestamp within the freshness window
    TimestampOk,
    /// Nonce seen for the first time
    NonceOk,
    /// Caller's DID document resolved
    DidResolved,
    /// Signature verified
    SignatureOk,
    /// Request authenticated
    Accepted,
}

/// Incoming request data relevant to authentication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    /// Request path
    pub path: String,
    /// `Host` header, port included
    pub host: String,
    /// `Authorization` header
    pub authorization: Option<String>,
    /// `req_did` header, the caller's DID on bearer calls
    pub req_did: Option<String>,
    /// `resp_did` header, the addressed local agent
    pub resp_did: Option<String>,
}

impl AuthRequest {
    /// Host without port, the domain signatures are bound to
    pub fn domain(&self) -> &str {
        domain_from_host(&self.host)
    }
}

/// How a request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Cached bearer token
    Bearer,
    /// DID signature
    DidSignature,
}

/// Authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Authenticated caller
    pub caller_did: String,
    /// Local agent the caller authenticated to
    pub agent_did: String,
    /// Mechanism used
    pub method: AuthMethod,
    /// Value for the response `Authorization` header
    pub response_header: Option<String>,
    /// Token issued during this request
    pub issued_token: Option<Token>,
}

/// Response object of a two-way handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token for subsequent calls
    pub access_token: String,

    /// Always `bearer`
    pub token_type: String,

    /// Token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Server's own DID proof
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_did_auth_header: Option<RespDidAuthHeader>,
}

/// Wrapper for the server's reciprocal header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespDidAuthHeader {
    /// Header value
    #[serde(rename = "Authorization")]
    pub authorization: String,
}

/// Verifies incoming requests on behalf of the local agents
pub struct AuthenticationServer {
    resolver: Arc<dyn DidResolver>,
    nonces: Arc<dyn NonceStore>,
    agents: Arc<dyn AgentRegistry>,
    timestamp_freshness: Duration,
    token_ttl: Duration,
}

impl AuthenticationServer {
    /// Create a server
    pub fn new(
        config: &AuthConfig,
        resolver: Arc<dyn DidResolver>,
        nonces: Arc<dyn NonceStore>,
        agents: Arc<dyn AgentRegistry>,
    ) -> Self {
        Self {
            resolver,
            nonces,
            agents,
            timestamp_freshness: config.timestamp_freshness,
            token_ttl: config.token_ttl,
        }
    }

    /// Agent registry
    pub fn agents(&self) -> &Arc<dyn AgentRegistry> {
        &self.agents
    }

    /// Authenticate a request
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthOutcome> {
        self.authenticate_at(request, Utc::now()).await
    }

    /// [`authenticate`](Self::authenticate) at an explicit instant
    pub async fn authenticate_at(
        &self,
        request: &AuthRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        let authorization = request
            .authorization
            .as_deref()
            .ok_or(AuthError::MissingHeader)?;
        tracing::debug!(stage = ?VerificationStage::Received, path = %request.path);

        let result = match header::classify(authorization) {
            Ok(AuthorizationKind::Bearer(token)) => self.verify_bearer(&token, request, now),
            Ok(AuthorizationKind::Did(parts)) => {
                self.verify_did_signature(&parts, request.domain(), request.resp_did.as_deref(), now)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!(path = %request.path, code = e.code(), error = %e, "authentication rejected");
        }
        result
    }

    fn verify_bearer(
        &self,
        token: &str,
        request: &AuthRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        let agent = self.target_agent(request.resp_did.as_deref())?;

        let holder = match request.req_did.as_deref() {
            Some(did) => did.to_string(),
            None => agent
                .tokens()
                .holder_of(token)
                .ok_or_else(|| AuthError::TokenNotFound(fingerprint(token)))?,
        };

        let record = agent.tokens().verify_at(token, &holder, now)?;
        tracing::debug!(caller = %holder, agent = %agent.did(), "bearer token accepted");

        Ok(AuthOutcome {
            caller_did: record.holder_did,
            agent_did: agent.did().to_string(),
            method: AuthMethod::Bearer,
            response_header: None,
            issued_token: None,
        })
    }

    /// Verify a decoded DID-signature header and issue a token
    pub async fn verify_did_signature(
        &self,
        parts: &AuthHeaderParts,
        domain: &str,
        resp_did_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        tracing::debug!(stage = ?VerificationStage::Parsed, did = %parts.did, key_id = %parts.key_id);

        let timestamp = parse_timestamp(&parts.timestamp)?;
        let fresh_until = check_timestamp(timestamp, now, self.timestamp_freshness)?;
        tracing::debug!(stage = ?VerificationStage::TimestampOk, did = %parts.did);

        if !self.nonces.check_and_record(&parts.nonce, fresh_until) {
            return Err(AuthError::ReplayedNonce(parts.nonce.clone()));
        }
        tracing::debug!(stage = ?VerificationStage::NonceOk, did = %parts.did);

        let document = self.resolver.resolve(&parts.did).await?;
        tracing::debug!(stage = ?VerificationStage::DidResolved, did = %parts.did);

        let payload = signer::canonical_payload(&parts.signed_fields(domain));
        if let Err(first) = verify_against(&document, parts, &payload) {
            // The document may be a stale cache entry from before a key rotation
            let fresh = self.resolver.resolve_fresh(&parts.did).await?;
            if fresh == document {
                return Err(first);
            }
            tracing::debug!(did = %parts.did, "retrying signature with freshly resolved document");
            verify_against(&fresh, parts, &payload)?;
        }
        tracing::debug!(stage = ?VerificationStage::SignatureOk, did = %parts.did);

        let agent = self.target_agent(parts.resp_did.as_deref().or(resp_did_hint))?;
        let token = agent.tokens().issue_at(&parts.did, self.token_ttl, now)?;

        let response_header = if parts.is_two_way() {
            let response = AuthResponse {
                access_token: token.token.clone(),
                token_type: "bearer".to_string(),
                expires_in: Some(token.expires_in_at(now)),
                resp_did_auth_header: Some(RespDidAuthHeader {
                    authorization: reciprocal_header(&agent, &parts.did)?,
                }),
            };
            serde_json::to_string(&response)?
        } else {
            format!("{} {}", header::BEARER_SCHEME, token.token)
        };

        tracing::info!(
            stage = ?VerificationStage::Accepted,
            caller = %parts.did,
            agent = %agent.did(),
            two_way = parts.is_two_way(),
            "DID handshake accepted"
        );

        Ok(AuthOutcome {
            caller_did: parts.did.clone(),
            agent_did: agent.did().to_string(),
            method: AuthMethod::DidSignature,
            response_header: Some(response_header),
            issued_token: Some(token),
        })
    }

    fn target_agent(&self, did: Option<&str>) -> Result<Arc<LocalAgent>> {
        match did {
            Some(did) => self.agents.require(did),
            None => self.agents.default_agent().ok_or_else(|| {
                AuthError::UnresolvableDid("no local agent to authenticate against".to_string())
            }),
        }
    }
}

/// Verify a header's signature with the named key of `document`
pub(crate) fn verify_against(
    document: &DidDocument,
    parts: &AuthHeaderParts,
    payload: &str,
) -> Result<()> {
    let public_key = document.authentication_key(&parts.key_id)?;
    signer::verify_encoded(payload.as_bytes(), &parts.signature, &public_key)
}

/// Sign the proof a local agent returns to a caller
///
/// The proof names the caller as counterparty and is bound to the caller's
/// DID host.
pub fn reciprocal_header(agent: &LocalAgent, caller_did: &str) -> Result<String> {
    let domain = did_host(caller_did)?;
    let ctx = AuthenticationContext::for_domain(agent.did(), caller_did, domain, true);
    Ok(header::encode_signed(&ctx, agent.signing_key()))
}

/// Accept a timestamp within `freshness` of `now`, in either direction
///
/// Returns the last instant the timestamp stays acceptable.
pub fn check_timestamp(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    freshness: Duration,
) -> Result<DateTime<Utc>> {
    let freshness = chrono::Duration::from_std(freshness)
        .map_err(|e| AuthError::Config(format!("freshness window out of range: {}", e)))?;

    let skew = now - timestamp;
    if skew > freshness || skew < -freshness {
        return Err(AuthError::TimestampExpired(format!(
            "{} is outside the {}s window",
            timestamp.to_rfc3339(),
            freshness.num_seconds()
        )));
    }
    Ok(timestamp + freshness)
}

/// Strip the port from a `Host` header value
pub fn domain_from_host(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map(|(ip, _)| ip).unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
