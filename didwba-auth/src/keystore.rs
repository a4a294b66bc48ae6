//! Local store of DID documents and agent credentials
//!
//! Holds the credential bundles of locally hosted agents together with
//! public-only documents deposited by the hosted-DID provisioning flow.

use crate::did::{DidCredentials, DidDocument, DID_DOCUMENT_FILE_NAME};
use crate::error::{AuthError, Result};
use crate::resolver::DidResolver;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// In-process key store
#[derive(Debug, Default)]
pub struct KeyStore {
    credentials: RwLock<HashMap<String, Arc<DidCredentials>>>,
    hosted: RwLock<HashMap<String, DidDocument>>,
}

impl KeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every credential bundle directory directly below `root`
    ///
    /// Directories without a DID document are skipped; a bundle that fails
    /// to load is logged and skipped.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let store = Self::new();

        let entries = std::fs::read_dir(root).map_err(|e| {
            AuthError::Config(format!(
                "Failed to read credentials directory {}: {}",
                root.display(),
                e
            ))
        })?;

        for entry in entries {
            let path = entry?.path();
            if !path.join(DID_DOCUMENT_FILE_NAME).is_file() {
                continue;
            }

            match DidCredentials::load_from_dir(&path) {
                Ok(creds) => {
                    tracing::debug!(did = %creds.did(), path = %path.display(), "loaded credential bundle");
                    store.insert(creds);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping credential bundle");
                }
            }
        }

        tracing::info!(count = store.len(), root = %root.display(), "key store loaded");
        Ok(store)
    }

    /// Add a local agent's credentials
    pub fn insert(&self, credentials: DidCredentials) -> Arc<DidCredentials> {
        let credentials = Arc::new(credentials);
        self.credentials
            .write()
            .insert(credentials.did().to_string(), credentials.clone());
        credentials
    }

    /// Register a public-only DID document
    pub fn deposit_document(&self, document: DidDocument) {
        tracing::debug!(did = %document.did, "hosted DID document deposited");
        self.hosted.write().insert(document.did.clone(), document);
    }

    /// Credentials of a local agent
    pub fn credentials(&self, did: &str) -> Option<Arc<DidCredentials>> {
        self.credentials.read().get(did).cloned()
    }

    /// DID document known locally, from a bundle or a deposit
    pub fn document(&self, did: &str) -> Option<DidDocument> {
        if let Some(creds) = self.credentials.read().get(did) {
            return Some(creds.document().clone());
        }
        self.hosted.read().get(did).cloned()
    }

    /// DIDs of local agents, sorted
    pub fn dids(&self) -> Vec<String> {
        let mut dids: Vec<String> = self.credentials.read().keys().cloned().collect();
        dids.sort();
        dids
    }

    /// Number of local agents
    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    /// Check if the store holds no agents
    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }
}

#[async_trait]
impl DidResolver for KeyStore {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        self.document(did)
            .ok_or_else(|| AuthError::UnresolvableDid(format!("{} is not in the local store", did)))
    }
}
