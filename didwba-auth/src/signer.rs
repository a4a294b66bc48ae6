//! Signatures over the canonical authentication payload
//!
//! The payload is the compact JSON serialization, keys sorted, of
//! `{"did", "nonce", "resp_did"?, "service", "timestamp"}`. Its SHA-256 digest
//! is signed with Ed25519 and the signature travels base64url without padding.

use crate::did::DidKeyPair;
use crate::error::{AuthError, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_compact::{PublicKey, Signature};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Fields bound into a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFields<'a> {
    /// Signer DID
    pub did: &'a str,
    /// Per-request nonce
    pub nonce: &'a str,
    /// RFC 3339 timestamp as sent on the wire
    pub timestamp: &'a str,
    /// Counterparty DID, two-way form only
    pub resp_did: Option<&'a str>,
    /// Host the signature is bound to
    pub domain: &'a str,
}

/// Build the canonical payload string
pub fn canonical_payload(fields: &SignedFields<'_>) -> String {
    let mut map = BTreeMap::new();
    map.insert("did", fields.did);
    map.insert("nonce", fields.nonce);
    map.insert("service", fields.domain);
    map.insert("timestamp", fields.timestamp);
    if let Some(resp_did) = fields.resp_did {
        map.insert("resp_did", resp_did);
    }

    // Serializing a map of strings cannot fail
    serde_json::to_string(&map).unwrap_or_default()
}

/// Sign a payload
pub fn sign(payload: &[u8], key: &DidKeyPair) -> Vec<u8> {
    let digest = Sha256::digest(payload);
    key.keypair().sk.sign(digest, None).as_ref().to_vec()
}

/// Verify a payload signature
pub fn verify(payload: &[u8], signature: &[u8], public_key: &PublicKey) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    let digest = Sha256::digest(payload);
    public_key.verify(digest, &signature).is_ok()
}

/// Sign a payload and encode the signature for the wire
pub fn sign_encoded(payload: &[u8], key: &DidKeyPair) -> String {
    URL_SAFE_NO_PAD.encode(sign(payload, key))
}

/// Decode a wire signature and verify it
pub fn verify_encoded(payload: &[u8], signature: &str, public_key: &PublicKey) -> Result<()> {
    let bytes = decode_signature(signature)?;
    if !verify(payload, &bytes, public_key) {
        return Err(AuthError::InvalidSignature(
            "signature does not match the resolved key".to_string(),
        ));
    }
    Ok(())
}

/// Decode a base64url signature, padded or not
pub fn decode_signature(signature: &str) -> Result<Vec<u8>> {
    let signature = signature.trim();
    URL_SAFE_NO_PAD
        .decode(signature)
        .or_else(|_| URL_SAFE.decode(signature))
        .map_err(|e| AuthError::InvalidSignature(format!("invalid signature encoding: {}", e)))
}
