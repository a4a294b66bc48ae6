//! Agent key material and credential bundles
//!
//! A credential bundle is a directory holding `did_document.json` and one
//! `<key-id>_private.pem` file (PKCS#8) per signing key.

use crate::did::document::{DidDocument, PublicKeyJwk, ServiceEndpoint, VerificationMethod};
use crate::did::wba::WbaDid;
use crate::error::{AuthError, Result};
use ed25519_compact::{KeyPair, PublicKey};
use std::fmt;
use std::path::Path;

/// Default verification method fragment
pub const DEFAULT_KEY_ID: &str = "key-1";

/// DID document file name inside a bundle
pub const DID_DOCUMENT_FILE_NAME: &str = "did_document.json";

/// Ed25519 signing key bound to a verification method
#[derive(Clone)]
pub struct DidKeyPair {
    keypair: KeyPair,
    key_id: String,
}

impl DidKeyPair {
    /// Wrap an existing keypair
    pub fn new(keypair: KeyPair, key_id: impl Into<String>) -> Self {
        Self {
            keypair,
            key_id: key_id.into(),
        }
    }

    /// Generate a fresh keypair
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(), key_id)
    }

    /// Load from a PKCS#8 PEM string
    pub fn from_pem(pem: &str, key_id: impl Into<String>) -> Result<Self> {
        let keypair = KeyPair::from_pem(pem)
            .map_err(|e| AuthError::Crypto(format!("Invalid private key PEM: {}", e)))?;
        Ok(Self::new(keypair, key_id))
    }

    /// Encode the private key as PKCS#8 PEM
    pub fn to_pem(&self) -> String {
        self.keypair.to_pem()
    }

    /// Verification method fragment
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public key
    pub fn public_key(&self) -> PublicKey {
        self.keypair.pk
    }

    /// Public key bytes
    pub fn public_key_bytes(&self) -> &[u8] {
        self.keypair.pk.as_ref()
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

impl fmt::Debug for DidKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DidKeyPair")
            .field("key_id", &self.key_id)
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// DID document plus the private keys it references
#[derive(Debug, Clone)]
pub struct DidCredentials {
    document: DidDocument,
    // Non-empty, signing key first
    key_pairs: Vec<DidKeyPair>,
}

impl DidCredentials {
    /// Pair a document with its keys
    ///
    /// Every key must match a verification method of the document.
    pub fn new(document: DidDocument, key_pairs: Vec<DidKeyPair>) -> Result<Self> {
        let mut verified: Vec<DidKeyPair> = Vec::with_capacity(key_pairs.len());

        for key_pair in key_pairs {
            let published = document.authentication_key(key_pair.key_id()).map_err(|e| {
                AuthError::Crypto(format!(
                    "key {} does not match {}: {}",
                    key_pair.key_id(),
                    document.did,
                    e
                ))
            })?;
            if published != key_pair.public_key() {
                return Err(AuthError::Crypto(format!(
                    "private key {} does not match the published key of {}",
                    key_pair.key_id(),
                    document.did
                )));
            }
            verified.retain(|k| k.key_id() != key_pair.key_id());
            verified.push(key_pair);
        }

        if verified.is_empty() {
            return Err(AuthError::Crypto(format!(
                "no signing key for {}",
                document.did
            )));
        }

        verified.sort_by_key(|k| (k.key_id() != DEFAULT_KEY_ID, k.key_id().to_string()));

        Ok(Self {
            document,
            key_pairs: verified,
        })
    }

    /// Create a new `did:wba` identity with one Ed25519 key
    pub fn generate(host: &str, port: Option<u16>, path_segments: &[&str]) -> Result<Self> {
        let wba = WbaDid::new(
            host,
            port,
            path_segments.iter().map(|s| s.to_string()).collect(),
        );
        let did = wba.to_string();
        let key_pair = DidKeyPair::generate(DEFAULT_KEY_ID);

        let method = VerificationMethod {
            id: format!("{}#{}", did, DEFAULT_KEY_ID),
            method_type: "Ed25519VerificationKey2020".to_string(),
            controller: did.clone(),
            public_key_jwk: Some(PublicKeyJwk::from_ed25519(&key_pair.public_key())),
        };

        let origin = match port {
            Some(port) => format!("http://{}:{}", host, port),
            None => format!("https://{}", host),
        };
        let service = ServiceEndpoint {
            id: format!("{}#ad", did),
            service_type: "AgentDescription".to_string(),
            endpoint: format!("{}/{}/ad.json", origin, path_segments.join("/")),
        };

        let document = DidDocument::build(&did, vec![method], vec![service])?;
        Self::new(document, vec![key_pair])
    }

    /// Load a bundle directory
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let content = std::fs::read_to_string(dir.join(DID_DOCUMENT_FILE_NAME))?;
        let document = DidDocument::from_json_str(&content)?;

        let mut key_pairs = Vec::new();
        for method in &document.verification_methods {
            let key_id = method.fragment();
            let key_path = dir.join(format!("{}_private.pem", key_id));
            if key_path.exists() {
                let pem = std::fs::read_to_string(&key_path)?;
                key_pairs.push(DidKeyPair::from_pem(&pem, key_id)?);
            }
        }

        Self::new(document, key_pairs)
    }

    /// Write the bundle to a directory
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let document = serde_json::to_string_pretty(&self.document.raw_document)?;
        std::fs::write(dir.join(DID_DOCUMENT_FILE_NAME), document)?;

        for key_pair in &self.key_pairs {
            std::fs::write(
                dir.join(format!("{}_private.pem", key_pair.key_id())),
                key_pair.to_pem(),
            )?;
        }

        Ok(())
    }

    /// DID
    pub fn did(&self) -> &str {
        &self.document.did
    }

    /// DID document
    pub fn document(&self) -> &DidDocument {
        &self.document
    }

    /// Key pair by fragment
    pub fn key_pair(&self, key_id: &str) -> Option<&DidKeyPair> {
        self.key_pairs.iter().find(|k| k.key_id() == key_id)
    }

    /// Key used for signing, `key-1` when present
    pub fn signing_key(&self) -> &DidKeyPair {
        &self.key_pairs[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_credentials() {
        let creds =
            DidCredentials::generate("a.example", Some(9000), &["wba", "user", "1111"]).unwrap();

        assert_eq!(creds.did(), "did:wba:a.example%3A9000:wba:user:1111");
        assert_eq!(creds.signing_key().key_id(), "key-1");
        assert_eq!(
            creds.document().authentication_key("key-1").unwrap(),
            creds.signing_key().public_key()
        );
        assert_eq!(
            creds.document().service_endpoints[0].endpoint,
            "http://a.example:9000/wba/user/1111/ad.json"
        );
    }

    #[test]
    fn test_bundle_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let creds =
            DidCredentials::generate("localhost", Some(9527), &["wba", "user", "abcd"]).unwrap();

        creds.save_to_dir(dir.path()).unwrap();
        let loaded = DidCredentials::load_from_dir(dir.path()).unwrap();

        assert_eq!(loaded.did(), creds.did());
        assert_eq!(
            loaded.signing_key().public_key(),
            creds.signing_key().public_key()
        );
    }

    #[test]
    fn test_rejects_mismatched_key() {
        let creds =
            DidCredentials::generate("a.example", None, &["wba", "user", "1"]).unwrap();
        let stranger = DidKeyPair::generate("key-1");

        let result = DidCredentials::new(creds.document().clone(), vec![stranger]);
        assert!(matches!(result, Err(AuthError::Crypto(_))));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let key = DidKeyPair::generate("key-1");
        let debug = format!("{:?}", key);
        assert!(debug.contains("key-1"));
        assert!(!debug.contains(&hex::encode(key.keypair().sk.as_ref())));
    }
}
