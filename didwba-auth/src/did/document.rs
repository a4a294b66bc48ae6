//! DID Documents
//!
//! Only the fields needed for authentication are typed; the full JSON is
//! preserved in `raw_document`.

use crate::did::wba::DID_WBA_PREFIX;
use crate::error::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_compact::PublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

/// Verification method types carrying Ed25519 keys
pub const ED25519_METHOD_TYPES: &[&str] = &[
    "Ed25519VerificationKey2018",
    "Ed25519VerificationKey2020",
    "JsonWebKey2020",
];

/// DID Document
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct DidDocument {
    /// DID this document describes
    #[validate(custom(function = "validate_did"))]
    pub did: String,

    /// Public keys, in document order
    pub verification_methods: Vec<VerificationMethod>,

    /// Verification method ids usable for authentication
    pub authentication: Vec<String>,

    /// Service endpoints
    pub service_endpoints: Vec<ServiceEndpoint>,

    /// Document exactly as received
    pub raw_document: Value,
}

/// Verification method entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Full id, `<did>#<fragment>`
    pub id: String,

    /// Key type tag
    #[serde(rename = "type")]
    pub method_type: String,

    /// Controlling DID
    pub controller: String,

    /// Public key as JWK
    #[serde(rename = "publicKeyJwk", skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

/// OKP JSON Web Key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    /// Key type, `OKP`
    pub kty: String,
    /// Curve, `Ed25519`
    pub crv: String,
    /// Base64url public key bytes
    pub x: String,
}

impl PublicKeyJwk {
    /// Build a JWK for an Ed25519 public key
    pub fn from_ed25519(public_key: &PublicKey) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(public_key.as_ref()),
        }
    }
}

/// Service endpoint entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Service id
    pub id: String,

    /// Service type
    #[serde(rename = "type")]
    pub service_type: String,

    /// Endpoint URL
    #[serde(rename = "serviceEndpoint")]
    pub endpoint: String,
}

impl VerificationMethod {
    /// Fragment after `#`
    pub fn fragment(&self) -> &str {
        self.id.rsplit_once('#').map(|(_, f)| f).unwrap_or(&self.id)
    }

    /// Extract the Ed25519 public key
    ///
    /// Fails for any other key type so that keys are never reinterpreted
    /// across curves.
    pub fn ed25519_public_key(&self) -> Result<PublicKey> {
        if !ED25519_METHOD_TYPES.contains(&self.method_type.as_str()) {
            return Err(AuthError::InvalidSignature(format!(
                "unsupported verification method type {}",
                self.method_type
            )));
        }

        let jwk = self.public_key_jwk.as_ref().ok_or_else(|| {
            AuthError::InvalidSignature(format!("{} has no publicKeyJwk", self.id))
        })?;

        if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
            return Err(AuthError::InvalidSignature(format!(
                "unsupported key {}/{} in {}",
                jwk.kty, jwk.crv, self.id
            )));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(jwk.x.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidSignature(format!("invalid key encoding: {}", e)))?;

        PublicKey::from_slice(&bytes)
            .map_err(|e| AuthError::InvalidSignature(format!("invalid public key: {}", e)))
    }
}

impl DidDocument {
    /// Parse a DID document from its JSON form
    pub fn from_json(raw: Value) -> Result<Self> {
        let did = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::UnresolvableDid("DID document has no id".to_string()))?
            .to_string();

        let verification_methods = match raw.get("verificationMethod") {
            Some(methods) => serde_json::from_value(methods.clone()).map_err(|e| {
                AuthError::UnresolvableDid(format!("invalid verificationMethod: {}", e))
            })?,
            None => Vec::new(),
        };

        // Entries may be ids or embedded verification methods
        let authentication = raw
            .get("authentication")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(id) => Some(id.clone()),
                        Value::Object(map) => {
                            map.get("id").and_then(Value::as_str).map(str::to_string)
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let service_endpoints = raw
            .get("service")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or_default();

        let document = Self {
            did,
            verification_methods,
            authentication,
            service_endpoints,
            raw_document: raw,
        };

        document
            .validate()
            .map_err(|e| AuthError::UnresolvableDid(format!("invalid DID document: {}", e)))?;

        Ok(document)
    }

    /// Parse a DID document from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| AuthError::UnresolvableDid(format!("invalid DID document JSON: {}", e)))?;
        Self::from_json(raw)
    }

    /// Build the JSON form of a new document
    pub fn build(
        did: &str,
        verification_methods: Vec<VerificationMethod>,
        service_endpoints: Vec<ServiceEndpoint>,
    ) -> Result<Self> {
        let authentication: Vec<String> =
            verification_methods.iter().map(|vm| vm.id.clone()).collect();

        let raw = serde_json::json!({
            "@context": [
                "https://www.w3.org/ns/did/v1",
                "https://w3id.org/security/suites/jws-2020/v1",
            ],
            "id": did,
            "verificationMethod": verification_methods,
            "authentication": authentication,
            "service": service_endpoints,
        });

        Self::from_json(raw)
    }

    /// Find a verification method by fragment (`key-1`) or full id
    pub fn verification_method(&self, key_id: &str) -> Option<&VerificationMethod> {
        let fragment = key_id.rsplit_once('#').map(|(_, f)| f).unwrap_or(key_id);
        self.verification_methods
            .iter()
            .find(|vm| vm.fragment() == fragment)
    }

    /// Public key for an authentication-capable verification method
    pub fn authentication_key(&self, key_id: &str) -> Result<PublicKey> {
        let method = self.verification_method(key_id).ok_or_else(|| {
            AuthError::InvalidSignature(format!(
                "verification method {} not found in {}",
                key_id, self.did
            ))
        })?;

        let method_id = self.absolute_id(&method.id);
        let authorized = self
            .authentication
            .iter()
            .any(|id| self.absolute_id(id) == method_id);
        if !authorized {
            return Err(AuthError::InvalidSignature(format!(
                "{} is not an authentication method",
                method.id
            )));
        }

        method.ed25519_public_key()
    }

    /// Expand a relative `#fragment` reference against this document's DID
    fn absolute_id(&self, id: &str) -> String {
        if id.starts_with('#') {
            format!("{}{}", self.did, id)
        } else {
            id.to_string()
        }
    }
}

fn validate_did(value: &str) -> std::result::Result<(), ValidationError> {
    if !value.starts_with(DID_WBA_PREFIX) || value.len() <= DID_WBA_PREFIX.len() {
        return Err(ValidationError::new("not_a_did_wba"));
    }
    Ok(())
}
