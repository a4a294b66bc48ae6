//! Authorization header wire format
//!
//! ```text
//! DIDWba did="<did>", nonce="<hex>", timestamp="<RFC3339>", resp_did="<did>", keyid="key-1", signature="<base64url>"
//! Bearer <token>
//! ```
//!
//! The one-way form omits `resp_did`. `verification_method` is accepted in
//! place of `keyid`.

use crate::context::AuthenticationContext;
use crate::did::DidKeyPair;
use crate::error::{AuthError, Result};
use crate::signer::{self, SignedFields};
use std::collections::HashMap;

/// Authorization scheme of DID-signature headers
pub const DIDWBA_SCHEME: &str = "DIDWba";

/// Authorization scheme of bearer headers
pub const BEARER_SCHEME: &str = "Bearer";

/// Parsed DID-signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaderParts {
    /// Signer DID
    pub did: String,
    /// Nonce
    pub nonce: String,
    /// Timestamp as sent
    pub timestamp: String,
    /// Counterparty DID, two-way form only
    pub resp_did: Option<String>,
    /// Verification method fragment
    pub key_id: String,
    /// Base64url signature
    pub signature: String,
}

/// What an Authorization header carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationKind {
    /// `Bearer <token>`
    Bearer(String),
    /// DID-signature header
    Did(AuthHeaderParts),
}

impl AuthHeaderParts {
    /// Fields covered by the signature, bound to `domain`
    pub fn signed_fields<'a>(&'a self, domain: &'a str) -> SignedFields<'a> {
        SignedFields {
            did: &self.did,
            nonce: &self.nonce,
            timestamp: &self.timestamp,
            resp_did: self.resp_did.as_deref(),
            domain,
        }
    }

    /// Check for the two-way form
    pub fn is_two_way(&self) -> bool {
        self.resp_did.is_some()
    }

    /// Render the header value
    pub fn encode(&self) -> String {
        let mut header = format!(
            "{} did=\"{}\", nonce=\"{}\", timestamp=\"{}\"",
            DIDWBA_SCHEME, self.did, self.nonce, self.timestamp
        );
        if let Some(resp_did) = &self.resp_did {
            header.push_str(&format!(", resp_did=\"{}\"", resp_did));
        }
        header.push_str(&format!(
            ", keyid=\"{}\", signature=\"{}\"",
            self.key_id, self.signature
        ));
        header
    }

    /// Parse a DID-signature header value
    ///
    /// The two-way form is tried first, then the one-way form.
    pub fn decode(header: &str) -> Result<Self> {
        let body = strip_scheme(header.trim(), DIDWBA_SCHEME).unwrap_or(header.trim());
        let fields = parse_fields(body)?;

        Self::two_way(&fields)
            .or_else(|| Self::one_way(&fields))
            .ok_or_else(|| {
                let mut present: Vec<&str> = fields.keys().copied().collect();
                present.sort_unstable();
                AuthError::MalformedHeader(format!(
                    "missing required fields, found [{}]",
                    present.join(", ")
                ))
            })
    }

    fn two_way(fields: &HashMap<&str, String>) -> Option<Self> {
        let resp_did = fields.get("resp_did")?.clone();
        let mut parts = Self::one_way(fields)?;
        parts.resp_did = Some(resp_did);
        Some(parts)
    }

    fn one_way(fields: &HashMap<&str, String>) -> Option<Self> {
        let key_id = fields
            .get("keyid")
            .or_else(|| fields.get("verification_method"))?;

        Some(Self {
            did: fields.get("did")?.clone(),
            nonce: fields.get("nonce")?.clone(),
            timestamp: fields.get("timestamp")?.clone(),
            resp_did: None,
            key_id: key_id.clone(),
            signature: fields.get("signature")?.clone(),
        })
    }
}

/// Build the header for a signed context
pub fn encode(ctx: &AuthenticationContext, key_id: &str, signature: &str) -> String {
    AuthHeaderParts {
        did: ctx.caller_did.clone(),
        nonce: ctx.nonce.clone(),
        timestamp: ctx.timestamp_string(),
        resp_did: ctx.resp_did().map(str::to_string),
        key_id: key_id.to_string(),
        signature: signature.to_string(),
    }
    .encode()
}

/// Sign a context with a key and build its header
pub fn encode_signed(ctx: &AuthenticationContext, key: &DidKeyPair) -> String {
    let timestamp = ctx.timestamp_string();
    let payload = signer::canonical_payload(&SignedFields {
        did: &ctx.caller_did,
        nonce: &ctx.nonce,
        timestamp: &timestamp,
        resp_did: ctx.resp_did(),
        domain: &ctx.domain,
    });
    let signature = signer::sign_encoded(payload.as_bytes(), key);
    encode(ctx, key.key_id(), &signature)
}

/// Parse a DID-signature header
pub fn decode(header: &str) -> Result<AuthHeaderParts> {
    AuthHeaderParts::decode(header)
}

/// Route a header to bearer or DID-signature handling
pub fn classify(header: &str) -> Result<AuthorizationKind> {
    let header = header.trim();
    if header.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    if let Some(token) = strip_scheme(header, BEARER_SCHEME) {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MalformedHeader("empty bearer token".to_string()));
        }
        return Ok(AuthorizationKind::Bearer(token.to_string()));
    }

    AuthHeaderParts::decode(header).map(AuthorizationKind::Did)
}

fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = header.split_once(char::is_whitespace)?;
    head.eq_ignore_ascii_case(scheme).then_some(rest)
}

fn parse_fields(body: &str) -> Result<HashMap<&str, String>> {
    let mut fields = HashMap::new();

    for item in body.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| AuthError::MalformedHeader(format!("expected key=value, got {}", item)))?;

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        fields.insert(key.trim(), value.to_string());
    }

    Ok(fields)
}
